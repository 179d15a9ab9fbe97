//! Remote file operations consumed by the directory session and transfer pipeline
//!
//! The gateway owns the actual SFTP bridge. This trait is the seam: the HTTP
//! adapter in [`crate::gateway`] implements it for production, tests plug in
//! in-memory fakes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

use super::error::SftpError;
use super::types::{FileEntry, Listing};

/// Progress callback invoked with `(loaded, total)` bytes.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Where the bytes of an upload come from
#[derive(Debug, Clone)]
pub enum UploadBody {
    /// Already in memory (drag-and-drop buffers, generated content)
    Bytes(Bytes),
    /// Streamed from a local file
    File(PathBuf),
}

/// A file to be uploaded
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// Target file name inside the remote directory
    pub name: String,
    /// Total size in bytes
    pub size: u64,
    pub body: UploadBody,
}

impl UploadFile {
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            body: UploadBody::Bytes(data),
        }
    }

    /// Describe a local file, taking name and size from the filesystem.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, SftpError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(SftpError::InvalidPath(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| SftpError::InvalidPath(path.display().to_string()))?;

        Ok(Self {
            name,
            size: metadata.len(),
            body: UploadBody::File(path.to_path_buf()),
        })
    }
}

/// Remote filesystem RPCs for one gateway.
///
/// Every call is a single request/response. Transfer calls additionally take a
/// progress callback and a cancellation token; when the token fires they must
/// stop and return [`SftpError::TransferCancelled`].
#[async_trait]
pub trait RemoteFs: Send + Sync {
    async fn list_directory(&self, server_id: &str, path: &str) -> Result<Listing, SftpError>;

    async fn read_file(&self, server_id: &str, path: &str) -> Result<String, SftpError>;

    async fn write_file(&self, server_id: &str, path: &str, content: &str)
        -> Result<(), SftpError>;

    async fn delete(&self, server_id: &str, path: &str) -> Result<(), SftpError>;

    async fn rename(&self, server_id: &str, old_path: &str, new_path: &str)
        -> Result<(), SftpError>;

    async fn create_directory(&self, server_id: &str, path: &str) -> Result<(), SftpError>;

    /// Transport phase of an upload into `remote_dir`.
    ///
    /// `relay_task_id` asks the gateway to report the onward write to the
    /// remote host on the relay channel keyed by that id.
    async fn upload_file(
        &self,
        server_id: &str,
        remote_dir: &str,
        file: &UploadFile,
        on_progress: ProgressFn,
        relay_task_id: Option<&str>,
        abort: CancellationToken,
    ) -> Result<FileEntry, SftpError>;

    /// Stream a remote file into `sink`, returning the number of bytes written.
    async fn download_file(
        &self,
        server_id: &str,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        on_progress: ProgressFn,
        abort: CancellationToken,
    ) -> Result<u64, SftpError>;
}
