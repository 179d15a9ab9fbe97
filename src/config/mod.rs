//! Configuration Management Module
//!
//! Gateway endpoints and transfer tuning, persisted as JSON in the user's
//! config directory.

pub mod storage;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sftp::types::constants::{DEFAULT_CHUNK_SIZE, RELAY_READY_TIMEOUT};

pub use storage::{config_dir, config_file, ConfigStorage, StorageError};

/// Current config file version
pub const CONFIG_VERSION: u32 = 1;

fn default_version() -> u32 {
    CONFIG_VERSION
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_relay_url() -> String {
    "ws://127.0.0.1:8080/ws/transfers".to_string()
}

fn default_relay_ready_timeout_ms() -> u64 {
    RELAY_READY_TIMEOUT.as_millis() as u64
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

/// Console configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_version")]
    pub version: u32,

    /// HTTP base of the file gateway
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// WebSocket base for relay channels; the task id is appended as the last segment
    #[serde(default = "default_relay_url")]
    pub relay_url: String,

    /// How long an upload waits for its relay channel before going without it
    #[serde(default = "default_relay_ready_timeout_ms")]
    pub relay_ready_timeout_ms: u64,

    /// Timeout for non-streaming requests (listing, mutations)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Whether uploads ask for relay-phase progress unless told otherwise
    #[serde(default = "default_true")]
    pub relay_by_default: bool,

    /// Chunk size for streamed upload bodies
    #[serde(default = "default_chunk_size")]
    pub upload_chunk_size: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            gateway_url: default_gateway_url(),
            relay_url: default_relay_url(),
            relay_ready_timeout_ms: default_relay_ready_timeout_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            relay_by_default: true,
            upload_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ConsoleConfig {
    pub fn relay_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.relay_ready_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Chunk size with a floor, so a zero in the file cannot stall uploads
    pub fn chunk_size(&self) -> usize {
        self.upload_chunk_size.max(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConsoleConfig::default();
        assert_eq!(config.version, CONFIG_VERSION);
        assert_eq!(config.relay_ready_timeout(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.relay_by_default);
        assert_eq!(config.chunk_size(), 256 * 1024);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: ConsoleConfig =
            serde_json::from_str(r#"{"gateway_url":"https://files.example.com"}"#).unwrap();
        assert_eq!(config.gateway_url, "https://files.example.com");
        assert_eq!(config.relay_url, default_relay_url());
        assert_eq!(config.version, CONFIG_VERSION);
    }

    #[test]
    fn test_chunk_size_floor() {
        let config = ConsoleConfig {
            upload_chunk_size: 0,
            ..Default::default()
        };
        assert_eq!(config.chunk_size(), 4096);
    }
}
