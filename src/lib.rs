//! SFTP Console - remote file browsing and tracked transfers
//!
//! A directory session per connected server, a registry of uploads and
//! downloads with live progress, and a two-phase upload pipeline that follows
//! a file from the client to the gateway and on to the remote host.

pub mod config;
pub mod gateway;
pub mod sftp;

pub use config::{ConfigStorage, ConsoleConfig};
pub use gateway::Gateway;
pub use sftp::{DirectorySession, SftpError, TransferPipeline, TransferRegistry};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging.
///
/// Honors `RUST_LOG`, defaulting to `info`. Safe to call more than once; only
/// the first call installs the subscriber.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
