//! SFTP console core
//!
//! Directory browsing, tracked uploads/downloads and the formatting helpers
//! their progress display needs. Remote I/O goes through the [`RemoteFs`] and
//! [`RelayConnector`] seams; see [`crate::gateway`] for the network adapters.

pub mod error;
pub mod format;
pub mod path_utils;
pub mod pipeline;
pub mod registry;
pub mod relay;
pub mod remote;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{SftpError, ABORTED};
pub use format::{
    estimate_remaining_secs, format_bytes, format_remaining_time, format_speed, parse_file_size,
    UNKNOWN_TIME,
};
pub use pipeline::{DownloadRequest, TransferPipeline, UploadRequest};
pub use registry::{AbortHandle, TransferEvent, TransferGuard, TransferRegistry, TransportHandle};
pub use relay::{RelayChannel, RelayCommand, RelayConnector, RelayMessage, RelaySender};
pub use remote::{ProgressFn, RemoteFs, UploadBody, UploadFile};
pub use session::{DirectoryOp, DirectorySession, DirectorySessionState, OpOutput};
pub use types::*;
