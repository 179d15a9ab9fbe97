//! SFTP pipeline error types

use thiserror::Error;

/// Error string carried by a transport that was aborted on request.
pub const ABORTED: &str = "aborted";

#[derive(Error, Debug)]
pub enum SftpError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Listing failed: {0}")]
    ListingFailed(String),

    #[error("Remote error ({status}): {message}")]
    RemoteError { status: u16, message: String },

    #[error("Transfer error: {0}")]
    TransferError(String),

    /// The transport was aborted because the user cancelled the task.
    #[error("Transfer aborted")]
    TransferCancelled,

    #[error("Transfer task not found: {0}")]
    TaskNotFound(String),

    #[error("Relay error: {0}")]
    RelayError(String),

    #[error("Channel error: {0}")]
    ChannelError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl SftpError {
    /// True only for a user-initiated abort, never for other transport failures.
    pub fn is_abort(&self) -> bool {
        matches!(self, SftpError::TransferCancelled)
    }

    /// Map an HTTP status and server message into the closest variant.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            404 => SftpError::NotFound(message),
            401 | 403 => SftpError::PermissionDenied(message),
            _ => SftpError::RemoteError { status, message },
        }
    }
}

impl From<reqwest::Error> for SftpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SftpError::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            SftpError::from_status(status.as_u16(), err.to_string())
        } else {
            SftpError::TransferError(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SftpError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SftpError::ChannelError(err.to_string())
    }
}

// Front ends receive errors as plain strings
impl serde::Serialize for SftpError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
