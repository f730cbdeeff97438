//! Agent configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::transport::TransferCredentials;

pub const DEFAULT_UPDATE_TOPIC: &str = "device/updates";
pub const DEFAULT_RECEIVE_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Configuration for the update agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Topic update notifications arrive on.
    pub update_topic: String,
    /// Bound on each blocking transfer read, in milliseconds.
    pub receive_timeout_ms: u64,
    /// Bytes requested per transfer read.
    pub chunk_size: usize,
    /// Reconnect attempts before giving up on the link.
    pub max_reconnect_attempts: u32,
    /// PEM file with the firmware server's trust anchor.
    pub trust_anchor_path: Option<String>,
    /// Directory holding the partition images (host runs only).
    pub partition_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            update_topic: DEFAULT_UPDATE_TOPIC.to_string(),
            receive_timeout_ms: DEFAULT_RECEIVE_TIMEOUT_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            trust_anchor_path: None,
            partition_dir: "ota".to_string(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Transfer credentials, reading the trust anchor from disk if configured.
    pub fn load_credentials(&self) -> Result<TransferCredentials> {
        let trust_anchor = match &self.trust_anchor_path {
            Some(path) => Some(
                std::fs::read(path).with_context(|| format!("reading trust anchor {path}"))?,
            ),
            None => None,
        };
        Ok(TransferCredentials {
            trust_anchor,
            receive_timeout: self.receive_timeout(),
            chunk_size: self.chunk_size.max(1),
        })
    }
}
