//! # ccsync Core
//!
//! Pure primitives for ccsync: the project model, sync operations, chunking,
//! preprocessing and fingerprints.
//!
//! This crate performs no networking and keeps file access limited to
//! loading the project description.
//!
//! ## Key Types
//!
//! - [`Project`] - Root directory plus the ordered, validated channel list
//! - [`Channel`] - A named unit of content (library or script)
//! - [`SyncOperation`] - One `Content`, `Chunk` or `Deletion` instruction
//! - [`Fingerprint`] - Blake3 digest over a resolved operation list
//! - [`Preprocessor`] - Pure text transform applied before sending
//!
//! ## Canonicalization
//!
//! Fingerprints hash a deterministic CBOR encoding. See [`canonical`] module.

pub mod canonical;
pub mod chunk;
pub mod error;
pub mod fingerprint;
pub mod operation;
pub mod preprocess;
pub mod project;
pub mod validation;

pub use canonical::{canonical_operation_bytes, canonical_operations_bytes};
pub use chunk::{chunk, ChunkLimits, DEFAULT_DIRECTORY_CHUNK_BYTES, DEFAULT_FILE_CHUNK_BYTES};
pub use error::{CoreError, ProjectError};
pub use fingerprint::Fingerprint;
pub use operation::{replay, SyncOperation};
pub use preprocess::{minify, LuaPreprocessor, Passthrough, Preprocessor, BUILTIN_MODULES};
pub use project::{Channel, ChannelKind, Project};
pub use validation::validate_channels;
