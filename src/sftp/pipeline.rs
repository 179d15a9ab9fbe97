//! Transfer pipeline
//!
//! Drives one upload through the transport phase (client → gateway) and the
//! optional relay phase (gateway → remote host), or one download through its
//! single transport phase, keeping the task in [`TransferRegistry`] current.
//!
//! User aborts resolve to `Ok(None)`; every other failure is recorded on the
//! task and returned as an error.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, info, trace, warn};

use super::error::SftpError;
use super::registry::{AbortHandle, TransferGuard, TransferRegistry};
use super::relay::{RelayChannel, RelayConnector, RelayMessage};
use super::remote::{ProgressFn, RemoteFs, UploadFile};
use super::types::constants::RELAY_READY_TIMEOUT;
use super::types::{FileEntry, TaskPatch, TransferDirection, TransferPhase, TransferTask};

/// One upload into a remote directory
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub server_id: String,
    pub remote_dir: String,
    pub file: UploadFile,
    /// Ask the gateway to report the onward write on the relay channel
    pub relay: bool,
}

/// One download of a remote file to a local path
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub server_id: String,
    pub remote_path: String,
    pub local_path: PathBuf,
    /// Size from the listing, 0 if unknown
    pub size: u64,
}

pub struct TransferPipeline {
    remote: Arc<dyn RemoteFs>,
    registry: Arc<TransferRegistry>,
    relay: Option<Arc<dyn RelayConnector>>,
    relay_ready_timeout: Duration,
    relay_by_default: bool,
}

impl TransferPipeline {
    pub fn new(remote: Arc<dyn RemoteFs>, registry: Arc<TransferRegistry>) -> Self {
        Self {
            remote,
            registry,
            relay: None,
            relay_ready_timeout: RELAY_READY_TIMEOUT,
            relay_by_default: false,
        }
    }

    /// Enable relay-phase reporting through `connector`
    pub fn with_relay(mut self, connector: Arc<dyn RelayConnector>) -> Self {
        self.relay = Some(connector);
        self
    }

    pub fn with_relay_ready_timeout(mut self, timeout: Duration) -> Self {
        self.relay_ready_timeout = timeout;
        self
    }

    /// Relay mode used when a caller does not choose one
    pub fn with_relay_by_default(mut self, enabled: bool) -> Self {
        self.relay_by_default = enabled;
        self
    }

    pub fn relay_by_default(&self) -> bool {
        self.relay_by_default
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    /// Log registry bookkeeping failures. The task may have been removed
    /// while its transfer was still unwinding.
    fn record(&self, result: Result<TransferTask, SftpError>) {
        if let Err(e) = result {
            debug!("Transfer bookkeeping skipped: {}", e);
        }
    }

    fn progress_fn(&self, task_id: &str, phase: TransferPhase) -> ProgressFn {
        let registry = self.registry.clone();
        let task_id = task_id.to_string();
        Arc::new(move |loaded, total| {
            if let Err(e) = registry.apply_progress(&task_id, phase, loaded, total) {
                trace!("Dropping progress for {}: {}", task_id, e);
            }
        })
    }

    /// Settle a failed transport: aborts become cancellations, the rest failures.
    fn settle_error<T>(
        &self,
        task_id: &str,
        error: SftpError,
        abort: &AbortHandle,
    ) -> Result<Option<T>, SftpError> {
        if error.is_abort() || abort.is_aborted() {
            info!("Transfer {} cancelled", task_id);
            self.record(self.registry.mark_cancelled(task_id));
            Ok(None)
        } else {
            self.record(self.registry.fail(task_id, error.to_string()));
            Err(error)
        }
    }

    /// A task cancelled before it started is left alone
    fn already_finished(&self, task_id: &str) -> Result<bool, SftpError> {
        let task = self
            .registry
            .get(task_id)
            .ok_or_else(|| SftpError::TaskNotFound(task_id.to_string()))?;
        if task.is_terminal() {
            debug!("Not starting {}: already {:?}", task_id, task.status);
        }
        Ok(task.is_terminal())
    }

    /// Register an upload task without starting it
    pub fn register_upload(&self, file: &UploadFile) -> TransferTask {
        self.registry
            .create(TransferDirection::Upload, &file.name, file.size)
    }

    /// Register and run an upload
    pub async fn upload(&self, request: UploadRequest) -> Result<Option<FileEntry>, SftpError> {
        let task = self.register_upload(&request.file);
        self.run_upload(&task.id, request).await
    }

    /// Run a previously registered upload task
    pub async fn run_upload(
        &self,
        task_id: &str,
        request: UploadRequest,
    ) -> Result<Option<FileEntry>, SftpError> {
        let _guard = TransferGuard::new(self.registry.clone(), task_id.to_string());
        let abort = AbortHandle::new();
        self.registry
            .attach_transport(task_id, Arc::new(abort.clone()));
        // Checked after attaching so a concurrent cancel either sees the
        // handle or has already marked the task
        if self.already_finished(task_id)? {
            return Ok(None);
        }

        // The relay must already know the task id when bytes start moving
        let relay = if request.relay {
            self.open_relay(task_id).await
        } else {
            None
        };
        if let Some(channel) = &relay {
            self.registry.attach_relay(task_id, channel.sender.clone());
        }

        if abort.is_aborted() {
            return self.settle_error(task_id, SftpError::TransferCancelled, &abort);
        }

        self.registry
            .mark_active(task_id, Some(TransferPhase::TransportPhase))?;
        debug!(
            "Uploading {} ({} bytes) to {}:{}",
            request.file.name, request.file.size, request.server_id, request.remote_dir
        );

        let result = self
            .remote
            .upload_file(
                &request.server_id,
                &request.remote_dir,
                &request.file,
                self.progress_fn(task_id, TransferPhase::TransportPhase),
                request.relay.then_some(task_id),
                abort.token(),
            )
            .await;

        let entry = match result {
            Ok(entry) if !abort.is_aborted() => entry,
            Ok(_) => return self.settle_error(task_id, SftpError::TransferCancelled, &abort),
            Err(e) => return self.settle_error(task_id, e, &abort),
        };

        match relay {
            Some(channel) => {
                let completed = self.await_relay(task_id, channel, &abort).await;
                Ok(completed.then_some(entry))
            }
            None => {
                self.record(self.registry.complete(task_id));
                Ok(Some(entry))
            }
        }
    }

    /// Open the relay channel, waiting at most `relay_ready_timeout`.
    ///
    /// A channel that fails or never becomes ready is skipped: the upload then
    /// reports transport progress only.
    async fn open_relay(&self, task_id: &str) -> Option<RelayChannel> {
        let connector = match &self.relay {
            Some(connector) => connector,
            None => {
                debug!("Relay requested for {} but no connector configured", task_id);
                return None;
            }
        };

        match tokio::time::timeout(self.relay_ready_timeout, connector.open(task_id)).await {
            Ok(Ok(channel)) => {
                debug!("Relay channel ready for {}", task_id);
                Some(channel)
            }
            Ok(Err(e)) => {
                warn!(
                    "Relay channel for {} unavailable, continuing without relay progress: {}",
                    task_id, e
                );
                None
            }
            Err(_) => {
                warn!(
                    "Relay channel for {} not ready after {:?}, continuing without it",
                    task_id, self.relay_ready_timeout
                );
                None
            }
        }
    }

    /// Follow the relay phase until it completes, is cancelled, or the
    /// channel goes away. Returns whether the task completed.
    async fn await_relay(&self, task_id: &str, mut channel: RelayChannel, abort: &AbortHandle) -> bool {
        self.record(self.registry.update(
            task_id,
            TaskPatch::default().with_phase(TransferPhase::RelayPhase),
        ));
        let token = abort.token();

        loop {
            let message = tokio::select! {
                _ = token.cancelled() => {
                    info!("Transfer {} cancelled during relay", task_id);
                    self.record(self.registry.mark_cancelled(task_id));
                    return false;
                }
                message = channel.inbound.recv() => message,
            };

            match message {
                Some(RelayMessage::Progress {
                    loaded,
                    total,
                    speed_hint,
                }) => {
                    if let Some(speed) = speed_hint {
                        trace!("Relay speed hint for {}: {:.0} B/s", task_id, speed);
                    }
                    self.record(self.registry.apply_progress(
                        task_id,
                        TransferPhase::RelayPhase,
                        loaded,
                        total,
                    ));
                }
                Some(RelayMessage::Complete) => {
                    self.record(self.registry.complete(task_id));
                    return true;
                }
                Some(RelayMessage::Cancelled) => {
                    info!("Gateway cancelled relay for {}", task_id);
                    self.record(self.registry.mark_cancelled(task_id));
                    return false;
                }
                Some(RelayMessage::Error { message }) => {
                    // Advisory only; status follows complete/cancelled
                    warn!("Relay error for {}: {}", task_id, message);
                }
                None => {
                    warn!(
                        "Relay channel for {} closed before completion, keeping transport result",
                        task_id
                    );
                    self.record(self.registry.complete(task_id));
                    return true;
                }
            }
        }
    }

    /// Register and run a download
    pub async fn download(&self, request: DownloadRequest) -> Result<Option<PathBuf>, SftpError> {
        let name = request
            .remote_path
            .rsplit('/')
            .find(|s| !s.is_empty())
            .unwrap_or(request.remote_path.as_str())
            .to_string();
        let task = self
            .registry
            .create(TransferDirection::Download, &name, request.size);
        self.run_download(&task.id, request).await
    }

    /// Run a previously registered download task
    pub async fn run_download(
        &self,
        task_id: &str,
        request: DownloadRequest,
    ) -> Result<Option<PathBuf>, SftpError> {
        let _guard = TransferGuard::new(self.registry.clone(), task_id.to_string());
        let abort = AbortHandle::new();
        self.registry
            .attach_transport(task_id, Arc::new(abort.clone()));
        // Checked after attaching so a concurrent cancel either sees the
        // handle or has already marked the task
        if self.already_finished(task_id)? {
            return Ok(None);
        }

        let mut file = match tokio::fs::File::create(&request.local_path).await {
            Ok(file) => file,
            Err(e) => return self.settle_error(task_id, e.into(), &abort),
        };

        self.registry.mark_active(task_id, None)?;
        debug!(
            "Downloading {}:{} to {:?}",
            request.server_id, request.remote_path, request.local_path
        );

        let result = self
            .remote
            .download_file(
                &request.server_id,
                &request.remote_path,
                &mut file,
                self.progress_fn(task_id, TransferPhase::TransportPhase),
                abort.token(),
            )
            .await;

        let result = match result {
            Ok(_) if abort.is_aborted() => Err(SftpError::TransferCancelled),
            Ok(bytes) => file.flush().await.map(|_| bytes).map_err(SftpError::from),
            Err(e) => Err(e),
        };
        drop(file);

        match result {
            Ok(bytes) => {
                debug!("Downloaded {} bytes to {:?}", bytes, request.local_path);
                self.record(self.registry.complete(task_id));
                Ok(Some(request.local_path))
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&request.local_path).await {
                    debug!("Could not remove partial download {:?}: {}", request.local_path, rm);
                }
                self.settle_error(task_id, e, &abort)
            }
        }
    }
}
