//! # ccsync
//!
//! Serve channels of Lua sources to ComputerCraft subscribers.
//!
//! ## Overview
//!
//! A project groups source files into named channels. Subscribers connect
//! over a WebSocket, name the channels they want, and receive every file of
//! those channels and their requirements, one operation per message. The
//! server rescans the tree periodically and pushes changed channels to
//! every interested subscriber.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ccsync::{ServerConfig, SyncServer};
//!
//! async fn example() -> ccsync::Result<()> {
//!     let server = SyncServer::load(ServerConfig::default())?;
//!     server.run(async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `ccsync::core` - Project model, operations, preprocessing, fingerprints
//! - `ccsync::sync` - Resolver, change detection and delivery protocol

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod http;
pub mod server;

// Re-export component crates
pub use ccsync_core as core;
pub use ccsync_sync as sync;

pub use bootstrap::Bundler;
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use server::SyncServer;

pub use ccsync_core::{Channel, ChannelKind, Project, SyncOperation};
pub use ccsync_sync::{SyncConfig, SyncEngine};
