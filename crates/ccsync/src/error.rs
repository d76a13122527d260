//! Error types for the server.

use std::path::PathBuf;

use ccsync_core::{CoreError, ProjectError};
use ccsync_sync::SyncError;
use thiserror::Error;

/// Errors that can occur while running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The project file could not be loaded or is invalid.
    #[error("project error: {0}")]
    Project(#[from] ProjectError),

    /// Resolution or delivery error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Encoding error.
    #[error("encoding error: {0}")]
    Core(#[from] CoreError),

    /// A bootstrap source file could not be read.
    #[error("bootstrap file {path}: {source}")]
    Bootstrap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Listener or socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
