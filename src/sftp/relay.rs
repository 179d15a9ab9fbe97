//! Relay-phase channel
//!
//! After the transport phase the gateway keeps writing the received file to the
//! remote host and reports on a per-task bidirectional channel. This module
//! holds the message types and the connector seam; the WebSocket
//! implementation lives in [`crate::gateway::ws`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::SftpError;

/// Gateway → client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayMessage {
    Progress {
        loaded: u64,
        total: u64,
        /// Gateway-side speed estimate, informational only
        #[serde(default, alias = "speed", skip_serializing_if = "Option::is_none")]
        speed_hint: Option<f64>,
    },
    Complete,
    Cancelled,
    Error {
        message: String,
    },
}

impl RelayMessage {
    pub fn parse(text: &str) -> Result<Self, SftpError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Client → gateway control message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayCommand {
    Cancel { task_id: String },
}

impl RelayCommand {
    pub fn cancel(task_id: &str) -> Self {
        RelayCommand::Cancel {
            task_id: task_id.to_string(),
        }
    }
}

/// Outbound half of an open relay channel.
///
/// `send` never waits for the gateway: cancel is best-effort.
pub trait RelaySender: Send + Sync {
    fn send(&self, command: RelayCommand) -> Result<(), SftpError>;
}

/// Sender backed by an unbounded queue drained by the channel's write pump
#[derive(Debug, Clone)]
pub struct QueuedRelaySender {
    tx: mpsc::UnboundedSender<RelayCommand>,
}

impl QueuedRelaySender {
    pub fn new(tx: mpsc::UnboundedSender<RelayCommand>) -> Self {
        Self { tx }
    }
}

impl RelaySender for QueuedRelaySender {
    fn send(&self, command: RelayCommand) -> Result<(), SftpError> {
        self.tx
            .send(command)
            .map_err(|_| SftpError::ChannelError("relay channel closed".to_string()))
    }
}

/// An open, ready relay channel for one task
pub struct RelayChannel {
    pub sender: Arc<dyn RelaySender>,
    /// Parsed inbound messages; closes when the channel does
    pub inbound: mpsc::Receiver<RelayMessage>,
}

impl std::fmt::Debug for RelayChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayChannel").finish_non_exhaustive()
    }
}

/// Opens relay channels keyed by task id.
///
/// `open` resolves once the channel is ready to receive progress for the
/// task. Callers bound the wait themselves.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn open(&self, task_id: &str) -> Result<RelayChannel, SftpError>;
}
