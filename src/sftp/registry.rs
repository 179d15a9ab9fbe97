//! Transfer Task Registry
//!
//! Authoritative store of [`TransferTask`] records plus the side-table of live
//! transport handles used to cancel them. Pure bookkeeping: the registry never
//! performs I/O itself, it only signals handles that the pipeline attached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::SftpError;
use super::relay::{RelayCommand, RelaySender};
use super::types::constants::{CANCELLED_ERROR, EVENT_CHANNEL_CAPACITY};
use super::types::{TaskPatch, TransferDirection, TransferPhase, TransferStatus, TransferTask};

/// Length of the random part of a task id
const ID_SUFFIX_LEN: usize = 8;

/// Abortable transport behind a task (the in-flight HTTP request)
pub trait TransportHandle: Send + Sync {
    fn abort(&self);
}

/// Transport handle backed by a cancellation token shared with the transport
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token the transport watches
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl TransportHandle for AbortHandle {
    fn abort(&self) {
        self.token.cancel();
    }
}

/// Handles attached to one task
#[derive(Default, Clone)]
struct TaskHandles {
    transport: Option<Arc<dyn TransportHandle>>,
    relay: Option<Arc<dyn RelaySender>>,
}

impl TaskHandles {
    fn is_empty(&self) -> bool {
        self.transport.is_none() && self.relay.is_none()
    }
}

/// Change notifications for observers (UI layers)
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Created(TransferTask),
    Updated(TransferTask),
    Removed(String),
    Cleared,
}

struct TaskEntry {
    seq: u64,
    task: TransferTask,
}

/// Transfer Task Registry
pub struct TransferRegistry {
    tasks: DashMap<String, TaskEntry>,
    /// Transport side-table: task id → abort/send handles
    handles: RwLock<HashMap<String, TaskHandles>>,
    /// Creation counter, orders `list()`
    seq: AtomicU64,
    events: broadcast::Sender<TransferEvent>,
}

impl TransferRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tasks: DashMap::new(),
            handles: RwLock::new(HashMap::new()),
            seq: AtomicU64::new(0),
            events,
        }
    }

    /// Subscribe to task changes
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: TransferEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn random_suffix() -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ID_SUFFIX_LEN)
            .map(|c| (c as char).to_ascii_lowercase())
            .collect()
    }

    /// Register a new pending task under a fresh id
    pub fn create(
        &self,
        direction: TransferDirection,
        file_name: &str,
        file_size_bytes: u64,
    ) -> TransferTask {
        loop {
            let id = format!("{}-{}", Utc::now().timestamp_millis(), Self::random_suffix());
            if let Entry::Vacant(slot) = self.tasks.entry(id.clone()) {
                let task =
                    TransferTask::new(id.clone(), direction, file_name.to_string(), file_size_bytes);
                slot.insert(TaskEntry {
                    seq: self.seq.fetch_add(1, Ordering::SeqCst),
                    task: task.clone(),
                });
                info!(
                    "Registered {:?} transfer {}: {} ({} bytes)",
                    direction, id, file_name, file_size_bytes
                );
                self.emit(TransferEvent::Created(task.clone()));
                return task;
            }
            debug!("Transfer id collision on {}, regenerating", id);
        }
    }

    pub fn get(&self, id: &str) -> Option<TransferTask> {
        self.tasks.get(id).map(|e| e.task.clone())
    }

    /// All tasks in creation order
    pub fn list(&self) -> Vec<TransferTask> {
        let mut entries: Vec<(u64, TransferTask)> = self
            .tasks
            .iter()
            .map(|e| (e.seq, e.task.clone()))
            .collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, task)| task).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Apply `f` to a live task and publish the result.
    ///
    /// Terminal tasks are returned untouched. `f` reports whether the byte
    /// count changed so speed and ETA are recomputed only then.
    fn modify<F>(&self, id: &str, f: F) -> Result<TransferTask, SftpError>
    where
        F: FnOnce(&mut TransferTask) -> bool,
    {
        let updated = {
            let mut entry = self
                .tasks
                .get_mut(id)
                .ok_or_else(|| SftpError::TaskNotFound(id.to_string()))?;
            let task = &mut entry.task;

            if task.is_terminal() {
                debug!("Ignoring update for {} in terminal state {:?}", id, task.status);
                return Ok(task.clone());
            }

            let previous = task.status;
            let bytes_changed = f(task);

            if task.file_size_bytes > 0 && task.bytes_transferred > task.file_size_bytes {
                task.bytes_transferred = task.file_size_bytes;
            }

            if previous == TransferStatus::Pending && task.status == TransferStatus::Active {
                task.started_at = Utc::now();
            }

            match task.status {
                TransferStatus::Completed => {
                    if task.file_size_bytes > 0 {
                        task.bytes_transferred = task.file_size_bytes;
                    } else {
                        task.file_size_bytes = task.bytes_transferred;
                    }
                    task.recompute_rates(Utc::now());
                    task.eta_seconds = Some(0.0);
                }
                _ if bytes_changed => task.recompute_rates(Utc::now()),
                _ => {}
            }

            task.clone()
        };

        self.emit(TransferEvent::Updated(updated.clone()));
        Ok(updated)
    }

    /// Merge `patch` into the task with that id
    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<TransferTask, SftpError> {
        self.modify(id, |task| {
            if let Some(size) = patch.file_size_bytes {
                task.file_size_bytes = size;
            }
            if let Some(phase) = patch.phase {
                task.phase = Some(phase);
            }
            if let Some(status) = patch.status {
                task.status = status;
            }
            if patch.error.is_some() {
                task.error = patch.error;
            }
            match patch.bytes_transferred {
                Some(bytes) if bytes != task.bytes_transferred => {
                    task.bytes_transferred = bytes;
                    true
                }
                _ => false,
            }
        })
    }

    /// Single progress entry point for both the transport and relay phases.
    ///
    /// Moves a pending task to active and adopts `total` when the size was
    /// unknown. Byte counts are applied as delivered, regressions included.
    pub fn apply_progress(
        &self,
        id: &str,
        phase: TransferPhase,
        loaded: u64,
        total: u64,
    ) -> Result<TransferTask, SftpError> {
        self.modify(id, |task| {
            if task.status == TransferStatus::Pending {
                task.status = TransferStatus::Active;
            }
            if task.direction == TransferDirection::Upload {
                task.phase = Some(phase);
            }
            if task.file_size_bytes == 0 && total > 0 {
                task.file_size_bytes = total;
            }
            let changed = task.bytes_transferred != loaded;
            task.bytes_transferred = loaded;
            changed
        })
    }

    pub fn mark_active(
        &self,
        id: &str,
        phase: Option<TransferPhase>,
    ) -> Result<TransferTask, SftpError> {
        let mut patch = TaskPatch::status(TransferStatus::Active);
        patch.phase = phase;
        self.update(id, patch)
    }

    pub fn complete(&self, id: &str) -> Result<TransferTask, SftpError> {
        let task = self.update(id, TaskPatch::status(TransferStatus::Completed))?;
        info!("Transfer {} completed: {} bytes", id, task.bytes_transferred);
        Ok(task)
    }

    pub fn fail(&self, id: &str, message: impl Into<String>) -> Result<TransferTask, SftpError> {
        let message = message.into();
        warn!("Transfer {} failed: {}", id, message);
        self.update(
            id,
            TaskPatch::status(TransferStatus::Failed).with_error(message),
        )
    }

    pub fn mark_cancelled(&self, id: &str) -> Result<TransferTask, SftpError> {
        self.update(
            id,
            TaskPatch::status(TransferStatus::Cancelled).with_error(CANCELLED_ERROR),
        )
    }

    /// Attach the abortable transport of a task
    pub fn attach_transport(&self, id: &str, handle: Arc<dyn TransportHandle>) {
        self.handles
            .write()
            .entry(id.to_string())
            .or_default()
            .transport = Some(handle);
        debug!("Attached transport handle for {}", id);
    }

    /// Attach the relay channel sender of a task
    pub fn attach_relay(&self, id: &str, sender: Arc<dyn RelaySender>) {
        self.handles.write().entry(id.to_string()).or_default().relay = Some(sender);
        debug!("Attached relay channel for {}", id);
    }

    /// Drop all handles of a task (transfer finished either way)
    pub fn detach_handles(&self, id: &str) {
        if self.handles.write().remove(id).is_some() {
            debug!("Detached handles for {}", id);
        }
    }

    pub fn has_handles(&self, id: &str) -> bool {
        self.handles
            .read()
            .get(id)
            .map(|h| !h.is_empty())
            .unwrap_or(false)
    }

    /// Queue the relay cancel before aborting the transport: the abort wakes
    /// the pipeline, which then drops its end of the relay channel.
    fn signal_handles(id: &str, handles: &TaskHandles) {
        if let Some(relay) = &handles.relay {
            if let Err(e) = relay.send(RelayCommand::cancel(id)) {
                debug!("Relay cancel for {} not delivered: {}", id, e);
            }
        }
        if let Some(transport) = &handles.transport {
            transport.abort();
        }
    }

    /// Cancel a task.
    ///
    /// With live handles the transport is aborted and the relay told to stop;
    /// the pipeline then records the cancellation when the abort surfaces.
    /// Without handles the task is marked cancelled immediately. Returns
    /// `false` only if the id is unknown.
    pub fn cancel(&self, id: &str) -> bool {
        let handles = self.handles.read().get(id).cloned();

        match handles {
            Some(handles) if !handles.is_empty() => {
                Self::signal_handles(id, &handles);
                info!("Cancelled transfer: {}", id);
                true
            }
            _ => match self.mark_cancelled(id) {
                Ok(task) => {
                    info!("Cancelled transfer without transport: {} ({:?})", id, task.status);
                    true
                }
                Err(_) => {
                    warn!("Transfer not found for cancel: {}", id);
                    false
                }
            },
        }
    }

    /// Cancel (if still running) and forget a task
    pub fn remove(&self, id: &str) -> Option<TransferTask> {
        self.cancel(id);
        self.handles.write().remove(id);
        let removed = self.tasks.remove(id).map(|(_, e)| e.task);
        if removed.is_some() {
            debug!("Removed transfer: {}", id);
            self.emit(TransferEvent::Removed(id.to_string()));
        }
        removed
    }

    /// Remove every completed, failed or cancelled task. Returns how many went.
    pub fn clear_completed(&self) -> usize {
        let finished: Vec<String> = self
            .tasks
            .iter()
            .filter(|e| e.task.is_terminal())
            .map(|e| e.key().clone())
            .collect();

        for id in &finished {
            if self.tasks.remove(id).is_some() {
                self.handles.write().remove(id);
                self.emit(TransferEvent::Removed(id.clone()));
            }
        }
        debug!("Cleared {} finished transfers", finished.len());
        finished.len()
    }

    /// Cancel every running transport, then empty the registry
    pub fn clear_all(&self) {
        let running: Vec<String> = self
            .tasks
            .iter()
            .filter(|e| !e.task.is_terminal())
            .map(|e| e.key().clone())
            .collect();

        {
            let handles = self.handles.read();
            for id in &running {
                if let Some(h) = handles.get(id) {
                    Self::signal_handles(id, h);
                }
            }
        }

        self.handles.write().clear();
        self.tasks.clear();
        info!("Cleared all transfers ({} were running)", running.len());
        self.emit(TransferEvent::Cleared);
    }
}

impl Default for TransferRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that detaches a task's handles from [`TransferRegistry`] on drop.
///
/// Keeps the handle side-table from leaking on any early-return path. Create
/// one right after attaching the first handle and keep it alive for the
/// duration of the transfer.
pub struct TransferGuard {
    registry: Arc<TransferRegistry>,
    task_id: String,
}

impl TransferGuard {
    pub fn new(registry: Arc<TransferRegistry>, task_id: String) -> Self {
        Self { registry, task_id }
    }
}

impl Drop for TransferGuard {
    fn drop(&mut self) {
        self.registry.detach_handles(&self.task_id);
    }
}
