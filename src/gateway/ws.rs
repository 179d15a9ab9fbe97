//! WebSocket relay channel
//!
//! One socket per upload at `{relay_url}/{task_id}`. A pump task parses
//! inbound frames into [`RelayMessage`]s and writes queued
//! [`RelayCommand`]s; it exits when the gateway closes the socket, a terminal
//! message arrives, or the pipeline drops its end.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use crate::config::ConsoleConfig;
use crate::sftp::error::SftpError;
use crate::sftp::relay::{
    QueuedRelaySender, RelayChannel, RelayCommand, RelayConnector, RelayMessage,
};
use crate::sftp::types::constants::RELAY_CHANNEL_CAPACITY;

pub struct WsRelayConnector {
    base_url: String,
}

impl WsRelayConnector {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self::new(config.relay_url.as_str())
    }

    pub fn url_for(&self, task_id: &str) -> String {
        format!("{}/{}", self.base_url, task_id)
    }
}

#[async_trait]
impl RelayConnector for WsRelayConnector {
    /// Ready once the WebSocket handshake completes
    async fn open(&self, task_id: &str) -> Result<RelayChannel, SftpError> {
        let url = self.url_for(task_id);
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        debug!("Relay channel connected: {}", url);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
        tokio::spawn(relay_pump(
            task_id.to_string(),
            socket,
            command_rx,
            inbound_tx,
        ));

        Ok(RelayChannel {
            sender: Arc::new(QueuedRelaySender::new(command_tx)),
            inbound: inbound_rx,
        })
    }
}

/// Write one command; false once the socket can no longer take it
async fn send_command<W>(write: &mut W, task_id: &str, command: &RelayCommand) -> bool
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = match serde_json::to_string(command) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode relay command for {}: {}", task_id, e);
            return true;
        }
    };
    match write.send(Message::Text(json)).await {
        Ok(()) => {
            debug!("Sent relay command for {}: {:?}", task_id, command);
            true
        }
        Err(e) => {
            warn!("Relay send failed for {}: {}", task_id, e);
            false
        }
    }
}

/// Hand a non-progress message to the reader, still writing commands while
/// the inbound queue is full. False once the reader is gone.
async fn deliver<W>(
    write: &mut W,
    task_id: &str,
    inbound: &mpsc::Sender<RelayMessage>,
    commands: &mut mpsc::UnboundedReceiver<RelayCommand>,
    message: RelayMessage,
) -> bool
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let send = inbound.send(message);
    tokio::pin!(send);
    loop {
        tokio::select! {
            sent = &mut send => return sent.is_ok(),
            Some(command) = commands.recv() => {
                send_command(write, task_id, &command).await;
            }
        }
    }
}

async fn relay_pump<S>(
    task_id: String,
    socket: WebSocketStream<S>,
    mut commands: mpsc::UnboundedReceiver<RelayCommand>,
    inbound: mpsc::Sender<RelayMessage>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut write, mut read) = socket.split();
    let mut commands_open = true;

    loop {
        tokio::select! {
            biased;

            command = commands.recv(), if commands_open => match command {
                Some(command) => {
                    if !send_command(&mut write, &task_id, &command).await {
                        break;
                    }
                }
                None => commands_open = false,
            },

            _ = inbound.closed() => {
                trace!("Relay reader for {} dropped", task_id);
                break;
            }

            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => match RelayMessage::parse(&text) {
                    Ok(message) => {
                        let terminal =
                            matches!(message, RelayMessage::Complete | RelayMessage::Cancelled);
                        let delivered = match inbound.try_send(message) {
                            Ok(()) => true,
                            // Superseded by the next progress frame anyway
                            Err(TrySendError::Full(RelayMessage::Progress { loaded, .. })) => {
                                trace!("Relay queue full for {}, dropping progress {}", task_id, loaded);
                                true
                            }
                            Err(TrySendError::Full(message)) => {
                                deliver(&mut write, &task_id, &inbound, &mut commands, message).await
                            }
                            Err(TrySendError::Closed(_)) => false,
                        };
                        if !delivered || terminal {
                            break;
                        }
                    }
                    Err(e) => debug!("Ignoring relay frame for {}: {}", task_id, e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Relay channel for {} closed by gateway", task_id);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Relay channel error for {}: {}", task_id, e);
                    break;
                }
            },
        }
    }

    // A cancel queued just before the reader went away still goes out
    while let Ok(command) = commands.try_recv() {
        if !send_command(&mut write, &task_id, &command).await {
            break;
        }
    }

    if let Err(e) = write.close().await {
        trace!("Relay close for {}: {}", task_id, e);
    }
}
