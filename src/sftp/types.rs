//! SFTP data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Remote filesystem node as returned by a directory listing.
///
/// Entries are never patched: a refresh replaces the whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// File name (not full path)
    pub name: String,
    /// Node kind
    #[serde(rename = "type")]
    pub kind: FileKind,
    /// File size in bytes
    #[serde(default)]
    pub size: u64,
    /// Last modified time
    pub modified: DateTime<Utc>,
    /// Permission string as reported by the gateway (e.g. "rwxr-xr-x" or "755")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl FileEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
}

/// Directory listing response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Listing {
    /// Path the gateway actually listed (may be canonicalized)
    pub path: String,
    pub entries: Vec<FileEntry>,
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Transfer status
///
/// `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Registered, transport not started yet
    Pending,
    /// Bytes are moving
    Active,
    /// Completed successfully
    Completed,
    /// Failed with error
    Failed,
    /// Cancelled by user
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// Which hop of an upload the progress numbers refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferPhase {
    /// Client to gateway
    TransportPhase,
    /// Gateway to remote host
    RelayPhase,
}

/// One tracked upload or download
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferTask {
    /// Unique transfer ID (time-based + random suffix)
    pub id: String,
    pub file_name: String,
    /// Total bytes to transfer (0 = unknown)
    pub file_size_bytes: u64,
    pub direction: TransferDirection,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    /// Upload only
    pub phase: Option<TransferPhase>,
    pub started_at: DateTime<Utc>,
    /// Average speed since `started_at`
    pub speed_bytes_per_sec: f64,
    /// Estimated time remaining in seconds (`None` = unknown)
    pub eta_seconds: Option<f64>,
    /// Error message if failed or cancelled
    pub error: Option<String>,
}

impl TransferTask {
    pub fn new(id: String, direction: TransferDirection, file_name: String, size: u64) -> Self {
        Self {
            id,
            file_name,
            file_size_bytes: size,
            direction,
            status: TransferStatus::Pending,
            bytes_transferred: 0,
            phase: None,
            started_at: Utc::now(),
            speed_bytes_per_sec: 0.0,
            eta_seconds: None,
            error: None,
        }
    }

    /// Calculate progress percentage (0-100)
    pub fn progress_percent(&self) -> f64 {
        if self.file_size_bytes == 0 {
            if self.status == TransferStatus::Completed {
                100.0
            } else {
                0.0
            }
        } else {
            (self.bytes_transferred as f64 / self.file_size_bytes as f64) * 100.0
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Recompute speed and ETA from the since-start average.
    pub fn recompute_rates(&mut self, now: DateTime<Utc>) {
        let elapsed = (now - self.started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            self.speed_bytes_per_sec = 0.0;
            self.eta_seconds = None;
            return;
        }

        self.speed_bytes_per_sec = self.bytes_transferred as f64 / elapsed;
        self.eta_seconds = super::format::estimate_remaining_secs(
            self.file_size_bytes,
            self.bytes_transferred,
            self.speed_bytes_per_sec,
        );
    }
}

/// Partial update merged into a task by id. `None` fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TransferStatus>,
    pub bytes_transferred: Option<u64>,
    pub file_size_bytes: Option<u64>,
    pub phase: Option<TransferPhase>,
    pub error: Option<String>,
}

impl TaskPatch {
    pub fn status(status: TransferStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn bytes(bytes_transferred: u64) -> Self {
        Self {
            bytes_transferred: Some(bytes_transferred),
            ..Default::default()
        }
    }

    pub fn with_phase(mut self, phase: TransferPhase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Constants for transfer operations
pub mod constants {
    use std::time::Duration;

    /// Default chunk size for streamed uploads (256 KB)
    pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

    /// Upper bound on waiting for the relay channel to open
    pub const RELAY_READY_TIMEOUT: Duration = Duration::from_secs(2);

    /// Error recorded on a task cancelled without a live transport
    pub const CANCELLED_ERROR: &str = "cancelled";

    /// Capacity of the registry event broadcast
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;

    /// Capacity of the relay inbound message queue
    pub const RELAY_CHANNEL_CAPACITY: usize = 64;
}
