use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::Context;
use serde::Deserialize;
use crate::channel::ReconnectPolicy;

fn default_timeout_secs() -> u64 {
    30
}

fn default_session_file() -> PathBuf {
    PathBuf::from(".secureshare-session.json")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    pub api_endpoint: String,
    /// Without it the client runs with no real-time channel.
    pub socket_url: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,
    /// Where `downloads` are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    /// File uploaded by the demo binary.
    pub upload_path: Option<PathBuf>,
    /// Ids fetched into `download_dir` after the initial load.
    #[serde(default)]
    pub downloads: Vec<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1000,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Can't read {}", path.display()))?;

        Self::from_toml(&config_str)
            .with_context(|| format!("Can't load {}", path.display()))
    }

    pub fn from_toml(config_str: &str) -> anyhow::Result<Config> {
        Ok(toml::from_str(config_str)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            delay: Duration::from_millis(self.reconnect.delay_ms),
        }
    }
}
