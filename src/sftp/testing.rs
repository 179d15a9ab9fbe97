//! In-memory fakes for the remote RPCs and relay channel, shared by unit tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::sync::CancellationToken;

use super::error::SftpError;
use super::relay::{QueuedRelaySender, RelayChannel, RelayCommand, RelayConnector, RelayMessage};
use super::remote::{ProgressFn, RemoteFs, UploadFile};
use super::types::{FileEntry, FileKind, Listing};

/// Shared call log, so remote and relay fakes record into one ordered trace
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn entry(name: &str, kind: FileKind, size: u64) -> FileEntry {
    FileEntry {
        name: name.to_string(),
        kind,
        size,
        modified: Utc::now(),
        permissions: None,
        owner: None,
        group: None,
    }
}

pub fn files(names: &[&str]) -> Vec<FileEntry> {
    names.iter().map(|n| entry(n, FileKind::File, 1)).collect()
}

enum ListingReply {
    Ready(Result<Listing, String>),
    Gated(oneshot::Receiver<Result<Listing, String>>),
}

/// Scripted behaviour of the transport-phase fake
#[derive(Debug, Clone, Default)]
pub struct TransferScript {
    /// `(loaded, total)` events emitted before finishing
    pub progress: Vec<(u64, u64)>,
    /// Block until aborted after emitting progress
    pub hold: bool,
    /// Fail with a transport error instead of succeeding
    pub fail: Option<String>,
}

pub struct FakeRemote {
    pub log: CallLog,
    listings: Mutex<HashMap<String, ListingReply>>,
    pub fail_mutations: Mutex<Option<String>>,
    pub file_content: Mutex<String>,
    pub upload: Mutex<TransferScript>,
    pub download: Mutex<TransferScript>,
    pub download_data: Mutex<Bytes>,
    /// Notified once the transport has emitted its scripted progress
    pub transport_started: Notify,
    pub relay_ids: Mutex<Vec<Option<String>>>,
}

impl FakeRemote {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            listings: Mutex::new(HashMap::new()),
            fail_mutations: Mutex::new(None),
            file_content: Mutex::new(String::new()),
            upload: Mutex::new(TransferScript::default()),
            download: Mutex::new(TransferScript::default()),
            download_data: Mutex::new(Bytes::new()),
            transport_started: Notify::new(),
            relay_ids: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn record(&self, call: String) {
        self.log.lock().push(call);
    }

    pub fn set_listing(&self, path: &str, entries: Vec<FileEntry>) {
        self.listings.lock().insert(
            path.to_string(),
            ListingReply::Ready(Ok(Listing {
                path: path.to_string(),
                entries,
            })),
        );
    }

    pub fn fail_listing(&self, path: &str, message: &str) {
        self.listings
            .lock()
            .insert(path.to_string(), ListingReply::Ready(Err(message.to_string())));
    }

    /// The listing of `path` resolves only when the returned sender fires
    pub fn gate_listing(&self, path: &str) -> oneshot::Sender<Result<Listing, String>> {
        let (tx, rx) = oneshot::channel();
        self.listings
            .lock()
            .insert(path.to_string(), ListingReply::Gated(rx));
        tx
    }

    fn mutation(&self, call: String) -> Result<(), SftpError> {
        self.record(call);
        match self.fail_mutations.lock().clone() {
            Some(message) => Err(SftpError::RemoteError {
                status: 500,
                message,
            }),
            None => Ok(()),
        }
    }

    async fn run_script(
        &self,
        script: TransferScript,
        on_progress: &ProgressFn,
        abort: &CancellationToken,
    ) -> Result<(), SftpError> {
        for (loaded, total) in &script.progress {
            on_progress(*loaded, *total);
        }
        self.transport_started.notify_one();

        if script.hold {
            abort.cancelled().await;
        }
        if abort.is_cancelled() {
            return Err(SftpError::TransferCancelled);
        }
        if let Some(message) = script.fail {
            return Err(SftpError::TransferError(message));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteFs for FakeRemote {
    async fn list_directory(&self, _server_id: &str, path: &str) -> Result<Listing, SftpError> {
        self.record(format!("list {}", path));
        let reply = self.listings.lock().remove(path);
        let result = match reply {
            Some(ListingReply::Ready(result)) => {
                // Ready listings stay available for later refreshes
                self.listings
                    .lock()
                    .insert(path.to_string(), ListingReply::Ready(result.clone()));
                result
            }
            Some(ListingReply::Gated(rx)) => rx
                .await
                .unwrap_or_else(|_| Err("listing gate dropped".to_string())),
            None => Err(format!("no such directory: {}", path)),
        };
        result.map_err(SftpError::ListingFailed)
    }

    async fn read_file(&self, _server_id: &str, path: &str) -> Result<String, SftpError> {
        self.mutation(format!("read {}", path))?;
        Ok(self.file_content.lock().clone())
    }

    async fn write_file(
        &self,
        _server_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SftpError> {
        self.mutation(format!("write {} ({} bytes)", path, content.len()))
    }

    async fn delete(&self, _server_id: &str, path: &str) -> Result<(), SftpError> {
        self.mutation(format!("delete {}", path))
    }

    async fn rename(
        &self,
        _server_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), SftpError> {
        self.mutation(format!("rename {} -> {}", old_path, new_path))
    }

    async fn create_directory(&self, _server_id: &str, path: &str) -> Result<(), SftpError> {
        self.mutation(format!("mkdir {}", path))
    }

    async fn upload_file(
        &self,
        _server_id: &str,
        remote_dir: &str,
        file: &UploadFile,
        on_progress: ProgressFn,
        relay_task_id: Option<&str>,
        abort: CancellationToken,
    ) -> Result<FileEntry, SftpError> {
        self.record(format!("upload {} {}", remote_dir, file.name));
        self.relay_ids.lock().push(relay_task_id.map(String::from));

        let script = self.upload.lock().clone();
        self.run_script(script, &on_progress, &abort).await?;
        Ok(entry(&file.name, FileKind::File, file.size))
    }

    async fn download_file(
        &self,
        _server_id: &str,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        on_progress: ProgressFn,
        abort: CancellationToken,
    ) -> Result<u64, SftpError> {
        self.record(format!("download {}", path));
        let data = self.download_data.lock().clone();
        let half = data.len() / 2;
        sink.write_all(&data[..half]).await?;

        let script = self.download.lock().clone();
        self.run_script(script, &on_progress, &abort).await?;

        sink.write_all(&data[half..]).await?;
        on_progress(data.len() as u64, data.len() as u64);
        Ok(data.len() as u64)
    }
}

/// How the fake relay behaves when opened
pub enum RelayMode {
    /// Opens immediately with these messages queued; `keep_open` keeps the
    /// inbound side alive after they are consumed
    Ready {
        messages: Vec<RelayMessage>,
        keep_open: bool,
    },
    /// Never becomes ready
    NeverReady,
    /// Fails to open
    Fails,
}

pub struct FakeConnector {
    log: CallLog,
    mode: RelayMode,
    /// Inbound senders kept alive for `keep_open`
    held: Mutex<Vec<mpsc::Sender<RelayMessage>>>,
    pub commands: Mutex<Option<mpsc::UnboundedReceiver<RelayCommand>>>,
}

impl FakeConnector {
    pub fn new(log: CallLog, mode: RelayMode) -> Self {
        Self {
            log,
            mode,
            held: Mutex::new(Vec::new()),
            commands: Mutex::new(None),
        }
    }

    pub fn sent_commands(&self) -> Vec<RelayCommand> {
        let mut out = Vec::new();
        if let Some(rx) = self.commands.lock().as_mut() {
            while let Ok(cmd) = rx.try_recv() {
                out.push(cmd);
            }
        }
        out
    }
}

#[async_trait]
impl RelayConnector for FakeConnector {
    async fn open(&self, task_id: &str) -> Result<RelayChannel, SftpError> {
        self.log.lock().push(format!("relay open {}", task_id));
        match &self.mode {
            RelayMode::NeverReady => std::future::pending().await,
            RelayMode::Fails => Err(SftpError::ChannelError("connection refused".to_string())),
            RelayMode::Ready {
                messages,
                keep_open,
            } => {
                let (tx, rx) = mpsc::channel(messages.len().max(1));
                for msg in messages {
                    tx.try_send(msg.clone())
                        .map_err(|e| SftpError::ChannelError(e.to_string()))?;
                }
                if *keep_open {
                    self.held.lock().push(tx);
                }
                let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
                *self.commands.lock() = Some(cmd_rx);
                Ok(RelayChannel {
                    sender: Arc::new(QueuedRelaySender::new(cmd_tx)),
                    inbound: rx,
                })
            }
        }
    }
}
