//! Error types for the sync module.

use std::path::PathBuf;

use thiserror::Error;

use ccsync_core::{ChannelKind, CoreError};

/// Errors that can occur during resolution and delivery.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A channel name that is not part of the project.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    /// A library-only or script-only resolution path reached the wrong kind.
    #[error("channel {channel} is a {actual}, expected a {expected}")]
    ChannelKindMismatch {
        channel: String,
        expected: ChannelKind,
        actual: ChannelKind,
    },

    /// A file or directory referenced by a channel could not be read.
    #[error("file system error at {path}: {source}")]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The requirement chain loops back on itself.
    #[error("cyclic channel dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// The first inbound message was undecodable or named no known channel.
    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    /// The connection fell too far behind and was evicted.
    #[error("slow consumer: {0}")]
    SlowConsumer(String),

    /// The peer went away.
    #[error("connection closed")]
    Disconnected,

    /// Transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Encoding or hashing failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] CoreError),

    /// A background task failed to complete.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
