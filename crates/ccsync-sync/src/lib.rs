//! # ccsync Sync
//!
//! Resolution, change detection and ack-gated delivery of channels to
//! subscribers.
//!
//! ## Overview
//!
//! The [`SyncEngine`] owns the fingerprint table and the committed
//! directory snapshots. [`SyncEngine::scan`] rescans every channel and
//! [`SyncEngine::broadcast`] queues the operations of changed channels to
//! every interested connection without waiting for any of them. Each connection is served by a [`Session`] that
//! only sends an operation after the client has sent the matching ack
//! token.
//!
//! ## Message Flow
//!
//! ```text
//! Client                               Engine
//!   |-------- Handshake{channels} ------->|
//!   |-------- "init:0" ------------------>|
//!   |<------- operation 0 ----------------|
//!   |-------- "init:1" ------------------>|
//!   |<------- operation 1 ----------------|
//!   |<------- InitialComplete{2} ---------|
//!   |-------- "push:0" ------------------>|
//!   |            ... file change ...      |
//!   |<------- operation 0 of round -------|
//!   |-------- "push:1" ------------------>|
//! ```

pub mod detector;
pub mod engine;
pub mod error;
pub mod messages;
pub mod protocol;
pub mod registry;
pub mod resolver;
pub mod transport;

pub use detector::{ChangeDetector, ChangedChannel, ChannelFailure, ScanReport, SnapshotTable};
pub use engine::{BroadcastReport, PendingBroadcast, Subscription, SyncEngine};
pub use error::{Result, SyncError};
pub use messages::{
    encode_listing, limits, listing, AckToken, ChannelListing, Control, Cursor, Frame, Handshake,
    Phase,
};
pub use protocol::{Session, SessionEnd, SessionReport, SyncConfig, BACKLOG_EXCEEDED};
pub use registry::{ConnectionId, Eviction, Registration, Round, RoundOutcome, SubscriptionRegistry};
pub use resolver::{directory_files, Resolution, Resolver, Snapshots};
pub use transport::{inbox, memory::MemoryClient, memory::MemoryOutbound, Inbox, InboxSender, Outbound};
