//! A scripted subscriber over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use ccsync_core::{replay, SyncOperation};
use ccsync_sync::transport::memory::{connection, MemoryClient};
use ccsync_sync::{Control, Frame, Phase, SessionReport, SyncEngine};

/// How long the client waits for any single frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Session task handle returned alongside a client.
pub type SessionHandle = JoinHandle<ccsync_sync::Result<SessionReport>>;

/// A subscriber that acks operations as it reads them.
pub struct TestClient {
    inner: MemoryClient,
    push_slot: u64,
    received: Vec<SyncOperation>,
}

impl TestClient {
    /// Open a connection served by `engine`. No handshake is sent yet.
    pub fn connect(engine: &Arc<SyncEngine>) -> (Self, SessionHandle) {
        let (outbound, inbox, inner) = connection();
        let engine = Arc::clone(engine);
        let session = tokio::spawn(async move { engine.serve(outbound, inbox).await });
        (
            Self {
                inner,
                push_slot: 0,
                received: Vec::new(),
            },
            session,
        )
    }

    /// Connect and send the handshake for `channels`.
    pub fn subscribe(engine: &Arc<SyncEngine>, channels: &[&str]) -> (Self, SessionHandle) {
        let (mut client, session) = Self::connect(engine);
        client.inner.send_handshake(channels);
        (client, session)
    }

    /// Raw access for scripting unusual behavior.
    pub fn raw(&mut self) -> &mut MemoryClient {
        &mut self.inner
    }

    /// Ack through the initial phase and return its operations.
    ///
    /// Also sends the first push token, so later rounds flow without delay.
    /// Returns `None` if the server stalls or closes first.
    pub async fn receive_initial(&mut self) -> Option<Vec<SyncOperation>> {
        let mut operations = Vec::new();
        let mut slot = 0;
        loop {
            self.inner.ack(Phase::Initial, slot);
            match self.inner.recv_timeout(FRAME_TIMEOUT).await? {
                Frame::Operation(op) => {
                    operations.push(op);
                    slot += 1;
                }
                Frame::Control(Control::InitialComplete { operations: count }) => {
                    if count as usize != operations.len() {
                        return None;
                    }
                    break;
                }
            }
        }
        self.received.extend(operations.iter().cloned());
        self.inner.ack(Phase::Push, self.push_slot);
        Some(operations)
    }

    /// Read `count` pushed operations, acking each one.
    pub async fn receive_push(&mut self, count: usize) -> Option<Vec<SyncOperation>> {
        let mut operations = Vec::with_capacity(count);
        for _ in 0..count {
            match self.inner.recv_timeout(FRAME_TIMEOUT).await? {
                Frame::Operation(op) => {
                    self.push_slot += 1;
                    self.inner.ack(Phase::Push, self.push_slot);
                    operations.push(op);
                }
                Frame::Control(_) => return None,
            }
        }
        self.received.extend(operations.iter().cloned());
        Some(operations)
    }

    /// Whether no frame arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        self.inner.recv_timeout(wait).await.is_none()
    }

    /// Every operation received so far.
    pub fn received(&self) -> &[SyncOperation] {
        &self.received
    }

    /// The file tree a receiver would hold after applying everything.
    pub fn files(&self) -> Vec<(String, String)> {
        replay(&self.received)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn disconnect(&mut self) {
        self.inner.disconnect();
    }
}
