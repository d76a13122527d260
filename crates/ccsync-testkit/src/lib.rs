//! # ccsync Testkit
//!
//! Testing utilities for ccsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Temporary project trees with channels and a Lua root
//! - **Generators**: Proptest strategies for sources and directory layouts
//! - **Client**: A scripted subscriber that acks every operation
//!
//! ## Test Fixtures
//!
//! ```rust
//! use ccsync_testkit::fixtures::ProjectFixture;
//!
//! let fixture = ProjectFixture::util_main();
//! let project = fixture.project();
//! assert_eq!(project.channels().len(), 2);
//! ```
//!
//! ## Scripted Client
//!
//! ```rust,ignore
//! let engine = fixture.engine(SyncConfig::default());
//! let (mut client, session) = TestClient::subscribe(&engine, &["main"]);
//! let initial = client.receive_initial().await.unwrap();
//! ```

pub mod client;
pub mod fixtures;
pub mod generators;

pub use client::TestClient;
pub use fixtures::ProjectFixture;
