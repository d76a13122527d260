//! Transport abstraction for subscriber connections.
//!
//! A connection is split in two halves. The outbound half is an
//! [`Outbound`] implementation that carries encoded frames to the client.
//! The inbound half is an [`Inbox`]: the first message is kept as the
//! handshake, after which only the most recent message is retained, which
//! is all the ack loop ever compares against.
//!
//! Implementations may use WebSockets or anything else that moves whole
//! messages.

use async_trait::async_trait;
use tokio::sync::{oneshot, watch};

use crate::error::{Result, SyncError};
use crate::messages::AckToken;

/// Outbound half of a subscriber connection.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Send one encoded frame as a single transport message.
    async fn send(&self, frame: Vec<u8>) -> Result<()>;

    /// Close the connection. Must be idempotent.
    async fn close(&self);
}

/// Create a connected inbox pair.
pub fn inbox() -> (InboxSender, Inbox) {
    let (handshake_tx, handshake_rx) = oneshot::channel();
    let (latest_tx, latest_rx) = watch::channel(None);
    (
        InboxSender {
            handshake: Some(handshake_tx),
            latest: latest_tx,
        },
        Inbox {
            handshake: Some(handshake_rx),
            latest: latest_rx,
        },
    )
}

/// Producer side, owned by the transport's reader.
///
/// Dropping it signals that the peer went away.
#[derive(Debug)]
pub struct InboxSender {
    handshake: Option<oneshot::Sender<Vec<u8>>>,
    latest: watch::Sender<Option<Vec<u8>>>,
}

impl InboxSender {
    /// Record an inbound message.
    pub fn deliver(&mut self, message: Vec<u8>) {
        if let Some(tx) = self.handshake.take() {
            // A dropped receiver means the session already ended.
            let _ = tx.send(message);
        } else {
            self.latest.send_replace(Some(message));
        }
    }

    /// Whether the session side still exists.
    pub fn is_closed(&self) -> bool {
        self.latest.is_closed()
    }
}

/// Consumer side, owned by the session.
#[derive(Debug)]
pub struct Inbox {
    handshake: Option<oneshot::Receiver<Vec<u8>>>,
    latest: watch::Receiver<Option<Vec<u8>>>,
}

impl Inbox {
    /// Wait for the first inbound message.
    pub async fn handshake(&mut self) -> Result<Vec<u8>> {
        let rx = self
            .handshake
            .take()
            .ok_or_else(|| SyncError::TransportError("handshake already taken".into()))?;
        rx.await.map_err(|_| SyncError::Disconnected)
    }

    /// Wait until the most recent inbound message equals `token`.
    ///
    /// Returns immediately if it already does.
    pub async fn wait_for_token(&mut self, token: &AckToken) -> Result<()> {
        self.latest
            .wait_for(|m| m.as_deref().map_or(false, |m| token.matches(m)))
            .await
            .map(|_| ())
            .map_err(|_| SyncError::Disconnected)
    }

    /// Resolve once the transport side is gone.
    pub async fn closed(&mut self) {
        while self.latest.changed().await.is_ok() {}
    }

    /// The most recent message after the handshake.
    pub fn latest(&self) -> Option<Vec<u8>> {
        self.latest.borrow().clone()
    }
}

/// An in-memory transport for testing.
///
/// The client half plays the subscriber: it sends the handshake and ack
/// tokens and reads decoded frames.
pub mod memory {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::messages::{Frame, Handshake, Phase};

    /// Outbound half backed by an unbounded channel.
    #[derive(Debug, Clone)]
    pub struct MemoryOutbound {
        frames: mpsc::UnboundedSender<Vec<u8>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Outbound for MemoryOutbound {
        async fn send(&self, frame: Vec<u8>) -> Result<()> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SyncError::TransportError("connection closed".into()));
            }
            self.frames
                .send(frame)
                .map_err(|_| SyncError::TransportError("client dropped".into()))
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    /// Test-side view of a connection.
    #[derive(Debug)]
    pub struct MemoryClient {
        inbox: Option<InboxSender>,
        frames: mpsc::UnboundedReceiver<Vec<u8>>,
        closed: Arc<AtomicBool>,
    }

    /// Create a connection: the server halves and the client.
    pub fn connection() -> (MemoryOutbound, Inbox, MemoryClient) {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = inbox();
        let closed = Arc::new(AtomicBool::new(false));
        (
            MemoryOutbound {
                frames: frames_tx,
                closed: Arc::clone(&closed),
            },
            inbox_rx,
            MemoryClient {
                inbox: Some(inbox_tx),
                frames: frames_rx,
                closed,
            },
        )
    }

    impl MemoryClient {
        /// Send a raw inbound message.
        pub fn send(&mut self, message: impl Into<Vec<u8>>) {
            if let Some(inbox) = self.inbox.as_mut() {
                inbox.deliver(message.into());
            }
        }

        pub fn send_handshake<S: AsRef<str>>(&mut self, channels: &[S]) {
            let handshake = Handshake::new(channels.iter().map(|c| c.as_ref().to_string()));
            if let Ok(bytes) = handshake.encode() {
                self.send(bytes);
            }
        }

        /// Send the ready token for `slot` of `phase`.
        pub fn ack(&mut self, phase: Phase, slot: u64) {
            self.send(phase.token(slot).as_bytes().to_vec());
        }

        /// Next frame, or `None` if nothing arrives within `timeout`.
        pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Frame> {
            match tokio::time::timeout(timeout, self.frames.recv()).await {
                Ok(Some(bytes)) => Frame::decode(&bytes).ok(),
                _ => None,
            }
        }

        /// Whether the server closed the connection.
        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        /// Drop the inbound half, as if the peer hung up.
        pub fn disconnect(&mut self) {
            self.inbox = None;
        }
    }
}
