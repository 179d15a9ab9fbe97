//! Gateway adapters
//!
//! Network implementations of the [`RemoteFs`] and [`RelayConnector`] seams:
//! an HTTP client for file RPCs and a WebSocket connector for relay progress.

pub mod http;
pub mod ws;

use std::sync::Arc;

pub use http::HttpGateway;
pub use ws::WsRelayConnector;

use crate::config::ConsoleConfig;
use crate::sftp::error::SftpError;
use crate::sftp::pipeline::TransferPipeline;
use crate::sftp::registry::TransferRegistry;
use crate::sftp::relay::RelayConnector;
use crate::sftp::remote::RemoteFs;
use crate::sftp::session::DirectorySession;

/// Both gateway clients, built from one [`ConsoleConfig`]
pub struct Gateway {
    config: ConsoleConfig,
    remote: Arc<HttpGateway>,
    relay: Arc<WsRelayConnector>,
}

impl Gateway {
    pub fn from_config(config: ConsoleConfig) -> Result<Self, SftpError> {
        let remote = Arc::new(HttpGateway::from_config(&config)?);
        let relay = Arc::new(WsRelayConnector::from_config(&config));
        tracing::info!(
            "Gateway configured: {} (relay {})",
            config.gateway_url,
            config.relay_url
        );
        Ok(Self {
            config,
            remote,
            relay,
        })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub fn remote(&self) -> Arc<dyn RemoteFs> {
        self.remote.clone()
    }

    pub fn relay(&self) -> Arc<dyn RelayConnector> {
        self.relay.clone()
    }

    /// Transfer pipeline with relay reporting, the configured ready timeout
    /// and relay default
    pub fn pipeline(&self, registry: Arc<TransferRegistry>) -> TransferPipeline {
        TransferPipeline::new(self.remote(), registry)
            .with_relay(self.relay())
            .with_relay_ready_timeout(self.config.relay_ready_timeout())
            .with_relay_by_default(self.config.relay_by_default)
    }

    /// Directory session on `server_id`, positioned at `path`
    pub fn open_session(&self, server_id: &str, path: &str) -> DirectorySession {
        DirectorySession::new(server_id, self.remote(), path)
    }
}
