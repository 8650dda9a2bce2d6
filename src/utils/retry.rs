use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;
use crate::core::{Result, SessionError};

/// 重试间隔
#[derive(Debug, Clone)]
pub enum RetryStrategy {
    Fixed(Duration),
    /// 指数退避，不超过 `max_delay`
    Exponential {
        initial: Duration,
        multiplier: f64,
        max_delay: Duration,
    },
}

impl RetryStrategy {
    /// Delay after the failed attempt `attempt` (0 based).
    pub fn get_delay(&self, attempt: u32) -> Duration {
        match self {
            RetryStrategy::Fixed(delay) => *delay,
            RetryStrategy::Exponential { initial, multiplier, max_delay } => {
                let delay = Duration::from_secs_f64(initial.as_secs_f64() * multiplier.powf(attempt as f64));
                delay.min(*max_delay)
            }
        }
    }
}

/// How often a directory call is repeated and which failures qualify.
///
/// The default retries transport failures three times with exponential backoff
/// starting at 500ms.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    strategy: RetryStrategy,
    retry_if: fn(&SessionError) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::Exponential {
                initial: Duration::from_millis(500),
                multiplier: 2.0,
                max_delay: Duration::from_secs(10),
            },
            retry_if: SessionError::is_transport,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn retry_if(mut self, retry_if: fn(&SessionError) -> bool) -> Self {
        self.retry_if = retry_if;
        self
    }

    /// Run `operation` until it succeeds, fails with a non retryable error or
    /// the attempts run out. The last error is returned.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            attempt += 1;
            if attempt >= self.max_attempts || !(self.retry_if)(&error) {
                return Err(error);
            }

            let delay = self.strategy.get_delay(attempt - 1);
            debug!(attempt, ?delay, error = %error, "retryable failure");
            sleep(delay).await;
        }
    }
}
