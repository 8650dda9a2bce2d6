use std::time::Duration;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;
use crate::core::{Result, SessionContext, SessionError};
use crate::utils::RetryStrategy;
use super::events::{AuthenticatePayload, ChannelEvent};
use super::EventChannel;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bounded reconnection with a fixed pause between attempts.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    fn strategy(&self) -> RetryStrategy {
        RetryStrategy::Fixed(self.delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting { attempt: u32 },
    Connected,
    /// Connection lost, a reconnect sequence follows.
    Disconnected,
    /// Attempts exhausted, waiting for [`WsEventChannel::reconnect`].
    GaveUp,
    /// Worker stopped.
    Closed,
}

enum ChannelCommand {
    Emit(ChannelEvent),
    Authenticate,
    Reconnect,
}

enum ConnectionOutcome {
    Lost,
    Shutdown,
}

/// Websocket transport for [`ChannelEvent`]s.
#[derive(Clone)]
pub struct WsEventChannel {
    command_tx: mpsc::UnboundedSender<ChannelCommand>,
    event_tx: broadcast::Sender<ChannelEvent>,
    status_rx: watch::Receiver<ConnectionStatus>,
    shutdown: CancellationToken,
}

pub struct WsEventChannelHandle {
    pub channel: WsEventChannel,
    pub worker_handle: JoinHandle<()>,
}

impl WsEventChannelHandle {
    pub async fn shutdown(self) -> Result<()> {
        self.channel.disconnect();
        self.worker_handle.await
            .map_err(|err| SessionError::internal_error(format!("Channel worker panic: {}", err)))
    }
}

impl WsEventChannel {
    /// Spawn the connection worker. `url` may use `ws(s)://` or `http(s)://`.
    pub fn connect(url: &str, session: SessionContext, policy: ReconnectPolicy) -> Result<WsEventChannelHandle> {
        let url = socket_url(url)?;
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        // 最大缓存 256 个事件
        let (event_tx, _) = broadcast::channel(256);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting { attempt: 0 });
        let shutdown = CancellationToken::new();

        let worker = ChannelWorker {
            url,
            session,
            policy,
            command_rx,
            event_tx: event_tx.clone(),
            status_tx,
            shutdown: shutdown.clone(),
        };
        let worker_handle = tokio::spawn(worker.run());

        let channel = Self {
            command_tx,
            event_tx,
            status_rx,
            shutdown,
        };

        Ok(WsEventChannelHandle {
            channel,
            worker_handle,
        })
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Start a new connect sequence after the worker gave up.
    pub fn reconnect(&self) -> Result<()> {
        self.send_command(ChannelCommand::Reconnect)
    }

    /// Resend `authenticate` for the current session, e.g. right after login.
    pub fn authenticate(&self) -> Result<()> {
        self.send_command(ChannelCommand::Authenticate)
    }

    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }

    fn send_command(&self, command: ChannelCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| SessionError::ChannelDisconnected)
    }
}

#[async_trait]
impl EventChannel for WsEventChannel {
    async fn emit(&self, event: ChannelEvent) -> Result<()> {
        if !self.is_connected() {
            return Err(SessionError::ChannelDisconnected);
        }

        self.send_command(ChannelCommand::Emit(event))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }
}

fn socket_url(url: &str) -> Result<Url> {
    let mut parsed = Url::parse(url)
        .map_err(|_| SessionError::InvalidInput(format!("Invalid url: {:?}", url)))?;

    let scheme = match parsed.scheme() {
        "ws" | "wss" => return Ok(parsed),
        "http" => "ws",
        "https" => "wss",
        other => return Err(SessionError::InvalidInput(format!("Unsupported scheme: {}", other))),
    };

    parsed
        .set_scheme(scheme)
        .map_err(|_| SessionError::InvalidInput(format!("Invalid url: {:?}", url)))?;

    Ok(parsed)
}

struct ChannelWorker {
    url: Url,
    session: SessionContext,
    policy: ReconnectPolicy,
    command_rx: mpsc::UnboundedReceiver<ChannelCommand>,
    event_tx: broadcast::Sender<ChannelEvent>,
    status_tx: watch::Sender<ConnectionStatus>,
    shutdown: CancellationToken,
}

impl ChannelWorker {
    async fn run(mut self) {
        loop {
            let Some(stream) = self.connect_with_retry().await else {
                if self.shutdown.is_cancelled() {
                    break;
                }

                warn!(url = %self.url, max_attempts = self.policy.max_attempts, "giving up on event channel");
                self.set_status(ConnectionStatus::GaveUp);
                if self.wait_for_reconnect().await {
                    continue;
                }
                break;
            };

            self.drop_stale_commands();
            self.set_status(ConnectionStatus::Connected);
            info!(url = %self.url, "event channel connected");

            match self.serve(stream).await {
                ConnectionOutcome::Lost => {
                    // 断线期间的事件不会重放
                    warn!(url = %self.url, "event channel lost, reconnecting");
                    self.set_status(ConnectionStatus::Disconnected);
                }
                ConnectionOutcome::Shutdown => break,
            }
        }

        self.set_status(ConnectionStatus::Closed);
        info!("event channel closed");
    }

    async fn connect_with_retry(&mut self) -> Option<WsStream> {
        let strategy = self.policy.strategy();

        for attempt in 1..=self.policy.max_attempts {
            self.set_status(ConnectionStatus::Connecting { attempt });
            debug!(attempt, max_attempts = self.policy.max_attempts, url = %self.url, "connecting");

            let result = tokio::select! {
                result = connect_async(self.url.as_str()) => result,
                _ = self.shutdown.cancelled() => return None,
            };

            match result {
                Ok((stream, _)) => return Some(stream),
                Err(err) => warn!(attempt, url = %self.url, "connect failed: {}", err),
            }

            if attempt < self.policy.max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(strategy.get_delay(attempt)) => {}
                    _ = self.shutdown.cancelled() => return None,
                }
            }
        }

        None
    }

    /// Outbound events queued while no connection existed are not delivered.
    fn drop_stale_commands(&mut self) {
        while let Ok(command) = self.command_rx.try_recv() {
            if let ChannelCommand::Emit(event) = command {
                debug!(event = event.name(), "dropping event queued while disconnected");
            }
        }
    }

    async fn wait_for_reconnect(&mut self) -> bool {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(ChannelCommand::Reconnect) => return true,
                    Some(ChannelCommand::Emit(event)) => {
                        debug!(event = event.name(), "channel down, event dropped");
                    }
                    Some(ChannelCommand::Authenticate) => {}
                    None => return false,
                },
                _ = self.shutdown.cancelled() => return false,
            }
        }
    }

    async fn serve(&mut self, stream: WsStream) -> ConnectionOutcome {
        let (mut write, mut read) = stream.split();

        if let Some(event) = self.authenticate_event().await {
            if let Err(err) = send_event(&mut write, &event).await {
                warn!("failed to authenticate: {}", err);
                return ConnectionOutcome::Lost;
            }
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return ConnectionOutcome::Shutdown;
                }
                command = self.command_rx.recv() => {
                    let event = match command {
                        Some(ChannelCommand::Emit(event)) => Some(event),
                        Some(ChannelCommand::Authenticate) => self.authenticate_event().await,
                        Some(ChannelCommand::Reconnect) => None,
                        None => return ConnectionOutcome::Shutdown,
                    };

                    if let Some(event) = event {
                        if let Err(err) = send_event(&mut write, &event).await {
                            warn!(event = event.name(), "failed to emit: {}", err);
                            return ConnectionOutcome::Lost;
                        }
                    }
                }
                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => self.dispatch(&text),
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "server closed event channel");
                        return ConnectionOutcome::Lost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("event channel read failed: {}", err);
                        return ConnectionOutcome::Lost;
                    }
                    None => return ConnectionOutcome::Lost,
                },
            }
        }
    }

    async fn authenticate_event(&self) -> Option<ChannelEvent> {
        let identity = self.session.identity().await?;

        Some(ChannelEvent::Authenticate(AuthenticatePayload {
            token: identity.auth_token,
            user_name: identity.user_name,
            user_email: identity.user_email,
        }))
    }

    fn dispatch(&self, frame: &str) {
        match ChannelEvent::from_frame(frame) {
            Ok(event) => {
                debug!(event = event.name(), "event received");
                let _ = self.event_tx.send(event);
            }
            Err(err) => warn!("ignoring unrecognized frame: {}", err),
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }
}

async fn send_event<S>(write: &mut S, event: &ChannelEvent) -> Result<()>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let frame = event.to_frame()?;
    write.send(Message::Text(frame)).await?;
    Ok(())
}
