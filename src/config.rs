//! TOML 配置
//!
//! ```toml
//! endpoint = "https://api.example.com/api"
//! token = "..."
//! timeout_secs = 300
//! log_level = "info"
//!
//! [queue]
//! max_concurrent = 4
//! require_location = true
//!
//! [chunked]
//! abort_on_failure = true
//! max_attempts = 3
//! initial_backoff_ms = 1000
//! ```

use std::path::Path;
use std::time::Duration;
use serde::Deserialize;
use crate::core::{ChunkedConfig, QueueConfig, Result, UploadError};

#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// API 根地址
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub chunked: ChunkedSection,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct QueueSection {
    pub max_concurrent: Option<usize>,
    pub require_location: bool,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ChunkedSection {
    pub abort_on_failure: bool,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for ChunkedSection {
    fn default() -> Self {
        let defaults = ChunkedConfig::default();
        Self {
            abort_on_failure: defaults.abort_on_failure,
            max_attempts: defaults.max_attempts,
            initial_backoff_ms: defaults.initial_backoff.as_millis() as u64,
        }
    }
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| UploadError::Config(format!("Can't read {}: {}", path.display(), e)))?;
        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(config_str)
            .map_err(|e| UploadError::Config(format!("Can't parse config: {}", e)))?;

        if !config.endpoint.starts_with("http") {
            return Err(UploadError::Config(format!("Invalid endpoint: {:?}", config.endpoint)));
        }

        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_concurrent: self.queue.max_concurrent,
            require_location: self.queue.require_location,
            ..QueueConfig::default()
        }
    }

    pub fn chunked_config(&self) -> ChunkedConfig {
        ChunkedConfig {
            abort_on_failure: self.chunked.abort_on_failure,
            max_attempts: self.chunked.max_attempts,
            initial_backoff: Duration::from_millis(self.chunked.initial_backoff_ms),
            ..ChunkedConfig::default()
        }
    }
}
