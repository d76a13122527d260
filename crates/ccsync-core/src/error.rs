//! Error types for ccsync core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while encoding operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Errors raised while loading or validating a project.
#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("failed to read project file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid project file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("channel {0} is declared more than once")]
    DuplicateChannel(String),

    #[error("channel {channel} requires unknown channel {required}")]
    UnknownRequirement { channel: String, required: String },

    #[error("cyclic channel dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("channel name must not be empty")]
    EmptyChannelName,
}
