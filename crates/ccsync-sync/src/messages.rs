//! Wire messages exchanged with subscribers.
//!
//! Outbound frames are CBOR, one frame per transport message. Inbound
//! messages are the handshake (first message) and plain-text ack tokens.

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use ccsync_core::{ChannelKind, Project, SyncOperation};

use crate::error::{Result, SyncError};

/// Message size limits.
pub mod limits {
    /// Max encoded handshake size in bytes.
    pub const MAX_HANDSHAKE_BYTES: usize = 64 * 1024;
    /// Max channels named in a handshake.
    pub const MAX_CHANNELS_OF_INTEREST: usize = 256;
}

/// First inbound message: the channels a subscriber wants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub channels: Vec<String>,
}

impl Handshake {
    pub fn new<I, S>(channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            channels: channels.into_iter().map(Into::into).collect(),
        }
    }

    /// Encode as raw CBOR.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| SyncError::TransportError(format!("handshake encode: {e}")))?;
        Ok(buf)
    }

    /// Encode as base64 text for text-only transports.
    pub fn encode_text(&self) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.encode()?))
    }

    /// Decode from raw CBOR, falling back to base64-wrapped CBOR.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > limits::MAX_HANDSHAKE_BYTES {
            return Err(SyncError::MalformedHandshake(format!(
                "{} bytes exceeds limit of {}",
                bytes.len(),
                limits::MAX_HANDSHAKE_BYTES
            )));
        }

        let handshake = match ciborium::from_reader::<Self, _>(bytes) {
            Ok(h) => h,
            Err(raw_err) => {
                let text = std::str::from_utf8(bytes)
                    .map_err(|_| SyncError::MalformedHandshake(raw_err.to_string()))?;
                let decoded = base64::engine::general_purpose::STANDARD
                    .decode(text.trim())
                    .map_err(|_| SyncError::MalformedHandshake(raw_err.to_string()))?;
                ciborium::from_reader::<Self, _>(decoded.as_slice())
                    .map_err(|e| SyncError::MalformedHandshake(e.to_string()))?
            }
        };

        if handshake.channels.len() > limits::MAX_CHANNELS_OF_INTEREST {
            return Err(SyncError::MalformedHandshake(format!(
                "{} channels exceeds limit of {}",
                handshake.channels.len(),
                limits::MAX_CHANNELS_OF_INTEREST
            )));
        }
        Ok(handshake)
    }
}

/// Control frames that are not themselves ack-gated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Control {
    /// The initial state has been fully delivered.
    InitialComplete { operations: u64 },
}

/// An outbound frame.
///
/// Operation frames encode exactly like the bare [`SyncOperation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Operation(SyncOperation),
    Control(Control),
}

impl Frame {
    pub fn initial_complete(operations: usize) -> Self {
        Frame::Control(Control::InitialComplete {
            operations: operations as u64,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode_cbor(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| SyncError::TransportError(format!("frame decode: {e}")))
    }

    pub fn as_operation(&self) -> Option<&SyncOperation> {
        match self {
            Frame::Operation(op) => Some(op),
            Frame::Control(_) => None,
        }
    }
}

/// Encode a single operation frame without cloning it.
pub fn encode_operation(operation: &SyncOperation) -> Result<Vec<u8>> {
    encode_cbor(operation)
}

fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| SyncError::TransportError(format!("frame encode: {e}")))?;
    Ok(buf)
}

/// Delivery phase; each phase has its own ack token namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Initial state for a fresh connection.
    Initial,
    /// Incremental updates after the initial state.
    Push,
}

impl Phase {
    pub fn prefix(self) -> &'static str {
        match self {
            Phase::Initial => "init",
            Phase::Push => "push",
        }
    }

    /// Token the client sends to unlock the operation at `slot`.
    pub fn token(self, slot: u64) -> AckToken {
        AckToken(format!("{}:{}", self.prefix(), slot))
    }
}

/// A ready token, compared byte-for-byte against the latest inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AckToken(String);

impl AckToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    pub fn matches(&self, message: &[u8]) -> bool {
        message == self.0.as_bytes()
    }
}

impl std::fmt::Display for AckToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tracks the next ack slot within one phase.
///
/// The first operation of a phase waits for slot 0; every delivered
/// operation advances the cursor by one.
#[derive(Debug, Clone)]
pub struct Cursor {
    phase: Phase,
    next: u64,
}

impl Cursor {
    pub fn new(phase: Phase) -> Self {
        Self { phase, next: 0 }
    }

    pub fn token(&self) -> AckToken {
        self.phase.token(self.next)
    }

    pub fn advance(&mut self) {
        self.next += 1;
    }
}

/// One entry in the channel listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelListing {
    pub channel: String,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
}

/// List every channel, in project order.
pub fn listing(project: &Project) -> Vec<ChannelListing> {
    project
        .channels()
        .iter()
        .map(|c| ChannelListing {
            channel: c.name.clone(),
            kind: c.kind,
        })
        .collect()
}

/// Base64 text of the CBOR-encoded listing.
pub fn encode_listing(project: &Project) -> Result<String> {
    let bytes = encode_cbor(&listing(project))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}
