//! Directory Session
//!
//! Holds "where am I, what's here" for one remote connection. All mutating
//! directory operations go through [`DirectorySession::mutate`], which
//! refreshes the listing after every successful change.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::error::SftpError;
use super::path_utils::{
    is_absolute_remote_path, join_remote_path, parent_remote_path, resolve_remote_path,
};
use super::pipeline::{DownloadRequest, TransferPipeline, UploadRequest};
use super::remote::{RemoteFs, UploadFile};
use super::types::FileEntry;

/// Observable state of a directory session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySessionState {
    pub server_id: String,
    pub current_path: String,
    pub entries: Vec<FileEntry>,
    pub is_loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// A mutating (or reading) operation on an entry of the current directory.
///
/// Names are resolved against the current path; absolute names are used as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryOp {
    Delete(String),
    Rename { from: String, to: String },
    Mkdir(String),
    CreateFile(String),
    WriteFile { name: String, content: String },
    ReadFile(String),
}

impl DirectoryOp {
    /// Whether the operation changes the directory and needs a refresh
    fn mutates(&self) -> bool {
        !matches!(self, DirectoryOp::ReadFile(_))
    }
}

/// Result of [`DirectorySession::mutate`]
#[derive(Debug, Clone, PartialEq)]
pub enum OpOutput {
    Done,
    Content(String),
}

/// Resolve a navigation target. Unlike mutations, `.` and `..` are allowed.
fn navigation_target(cwd: &str, path: &str) -> String {
    let joined = if is_absolute_remote_path(path) {
        path.to_string()
    } else {
        join_remote_path(cwd, path)
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

pub struct DirectorySession {
    server_id: String,
    remote: Arc<dyn RemoteFs>,
    state: RwLock<DirectorySessionState>,
    /// Navigations currently awaiting a listing
    in_flight: AtomicUsize,
}

impl DirectorySession {
    /// Create a session positioned at `initial_path`. Nothing is fetched until
    /// the first [`navigate`](Self::navigate) or [`refresh`](Self::refresh).
    pub fn new(server_id: impl Into<String>, remote: Arc<dyn RemoteFs>, initial_path: &str) -> Self {
        let server_id = server_id.into();
        Self {
            state: RwLock::new(DirectorySessionState {
                server_id: server_id.clone(),
                current_path: navigation_target("/", initial_path),
                entries: Vec::new(),
                is_loading: false,
                last_error: None,
            }),
            server_id,
            remote,
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn current_path(&self) -> String {
        self.state.read().current_path.clone()
    }

    pub fn entries(&self) -> Vec<FileEntry> {
        self.state.read().entries.clone()
    }

    pub fn snapshot(&self) -> DirectorySessionState {
        self.state.read().clone()
    }

    /// Fetch the listing of `path` and make it current.
    ///
    /// Concurrent navigations are not sequenced: whichever listing arrives
    /// last is what the session shows. On failure the previous entries stay
    /// visible and the error is recorded in `last_error`.
    pub async fn navigate(&self, path: &str) -> Result<(), SftpError> {
        let target = navigation_target(&self.current_path(), path);

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.state.write().is_loading = true;
        debug!("Listing {}:{}", self.server_id, target);

        let result = self.remote.list_directory(&self.server_id, &target).await;

        let remaining = self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        let mut state = self.state.write();
        state.is_loading = remaining > 0;

        match result {
            Ok(listing) => {
                debug!("Listed {} entries in {}", listing.entries.len(), listing.path);
                state.current_path = if listing.path.is_empty() {
                    target
                } else {
                    listing.path
                };
                state.entries = listing.entries;
                state.last_error = None;
                Ok(())
            }
            Err(e) => {
                warn!("Failed to list {}:{}: {}", self.server_id, target, e);
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Re-list the current directory
    pub async fn refresh(&self) -> Result<(), SftpError> {
        let path = self.current_path();
        self.navigate(&path).await
    }

    /// Navigate to the parent directory; root stays root
    pub async fn navigate_up(&self) -> Result<(), SftpError> {
        let parent = parent_remote_path(&self.current_path());
        self.navigate(&parent).await
    }

    /// Refresh after a change, keeping the change's own outcome.
    async fn refresh_after(&self, what: &str) {
        if let Err(e) = self.refresh().await {
            warn!("Refresh after {} failed: {}", what, e);
        }
    }

    /// Run a directory operation, then refresh the listing on success.
    ///
    /// A failed operation propagates its error and leaves the listing alone.
    pub async fn mutate(&self, op: DirectoryOp) -> Result<OpOutput, SftpError> {
        let cwd = self.current_path();
        let server = self.server_id.as_str();

        let output = match &op {
            DirectoryOp::Delete(name) => {
                let path = resolve_remote_path(&cwd, name)?;
                self.remote.delete(server, &path).await?;
                info!("Deleted {}:{}", server, path);
                OpOutput::Done
            }
            DirectoryOp::Rename { from, to } => {
                let old_path = resolve_remote_path(&cwd, from)?;
                let new_path = resolve_remote_path(&cwd, to)?;
                self.remote.rename(server, &old_path, &new_path).await?;
                info!("Renamed {} -> {}", old_path, new_path);
                OpOutput::Done
            }
            DirectoryOp::Mkdir(name) => {
                let path = resolve_remote_path(&cwd, name)?;
                self.remote.create_directory(server, &path).await?;
                info!("Created directory {}:{}", server, path);
                OpOutput::Done
            }
            DirectoryOp::CreateFile(name) => {
                let path = resolve_remote_path(&cwd, name)?;
                self.remote.write_file(server, &path, "").await?;
                info!("Created file {}:{}", server, path);
                OpOutput::Done
            }
            DirectoryOp::WriteFile { name, content } => {
                let path = resolve_remote_path(&cwd, name)?;
                self.remote.write_file(server, &path, content).await?;
                debug!("Wrote {} bytes to {}", content.len(), path);
                OpOutput::Done
            }
            DirectoryOp::ReadFile(name) => {
                let path = resolve_remote_path(&cwd, name)?;
                OpOutput::Content(self.remote.read_file(server, &path).await?)
            }
        };

        if op.mutates() {
            self.refresh_after("mutation").await;
        }
        Ok(output)
    }

    pub async fn delete(&self, name: &str) -> Result<(), SftpError> {
        self.mutate(DirectoryOp::Delete(name.to_string())).await.map(|_| ())
    }

    pub async fn rename(&self, from: &str, to: &str) -> Result<(), SftpError> {
        self.mutate(DirectoryOp::Rename {
            from: from.to_string(),
            to: to.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn mkdir(&self, name: &str) -> Result<(), SftpError> {
        self.mutate(DirectoryOp::Mkdir(name.to_string())).await.map(|_| ())
    }

    pub async fn create_file(&self, name: &str) -> Result<(), SftpError> {
        self.mutate(DirectoryOp::CreateFile(name.to_string()))
            .await
            .map(|_| ())
    }

    pub async fn write_file(&self, name: &str, content: &str) -> Result<(), SftpError> {
        self.mutate(DirectoryOp::WriteFile {
            name: name.to_string(),
            content: content.to_string(),
        })
        .await
        .map(|_| ())
    }

    pub async fn read_file(&self, name: &str) -> Result<String, SftpError> {
        match self.mutate(DirectoryOp::ReadFile(name.to_string())).await? {
            OpOutput::Content(content) => Ok(content),
            OpOutput::Done => Ok(String::new()),
        }
    }

    /// Upload `file` into the current directory and refresh once it lands.
    ///
    /// `relay` of `None` follows the pipeline's default. Cancelled uploads
    /// resolve to `Ok(None)` without a refresh.
    pub async fn upload(
        &self,
        pipeline: &TransferPipeline,
        file: UploadFile,
        relay: Option<bool>,
    ) -> Result<Option<FileEntry>, SftpError> {
        let request = UploadRequest {
            server_id: self.server_id.clone(),
            remote_dir: self.current_path(),
            file,
            relay: relay.unwrap_or(pipeline.relay_by_default()),
        };

        let entry = pipeline.upload(request).await?;
        if entry.is_some() {
            self.refresh_after("upload").await;
        }
        Ok(entry)
    }

    /// Download entry `name` of the current directory into `local_dir`.
    pub async fn download(
        &self,
        pipeline: &TransferPipeline,
        name: &str,
        local_dir: &Path,
    ) -> Result<Option<PathBuf>, SftpError> {
        let remote_path = resolve_remote_path(&self.current_path(), name)?;
        let file_name = remote_path.rsplit('/').next().unwrap_or(name).to_string();
        let size = self
            .state
            .read()
            .entries
            .iter()
            .find(|e| e.name == file_name)
            .map(|e| e.size)
            .unwrap_or(0);

        pipeline
            .download(DownloadRequest {
                server_id: self.server_id.clone(),
                remote_path,
                local_path: local_dir.join(&file_name),
                size,
            })
            .await
    }
}
