//! Wire codec for operations, changes and deltas
//!
//! Messages are JSON envelopes `{"v": <protocol>, "message": {"type": ...}}`.
//! Unknown message types, unknown payload kinds and unsupported protocol
//! versions are rejected as [`VersioningError::MalformedOperation`]; nothing
//! is coerced into a supported shape.

use crate::{
    config::PROTOCOL_VERSION,
    error::{Result, VersioningError},
    operation::{Change, Operation},
    sync::DocumentDelta,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Message carried by the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    /// A single field operation
    Operation(Operation),
    /// Operations committed together against one document
    Change(Change),
    /// Full document state at a version vector
    Delta(DocumentDelta),
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u32,
    message: WireMessage,
}

/// Encoder/decoder for [`WireMessage`]s
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    protocol_version: u32,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(PROTOCOL_VERSION)
    }
}

impl Codec {
    pub fn new(protocol_version: u32) -> Self {
        Self { protocol_version }
    }

    pub fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    /// Encode a single operation
    pub fn encode(&self, operation: &Operation) -> Result<Bytes> {
        self.encode_message(&WireMessage::Operation(operation.clone()))
    }

    /// Decode a single operation; any other message type is rejected
    pub fn decode(&self, bytes: &[u8]) -> Result<Operation> {
        match self.decode_message(bytes)? {
            WireMessage::Operation(operation) => Ok(operation),
            other => Err(VersioningError::MalformedOperation(format!(
                "expected operation, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn encode_change(&self, change: &Change) -> Result<Bytes> {
        self.encode_message(&WireMessage::Change(change.clone()))
    }

    pub fn encode_delta(&self, delta: &DocumentDelta) -> Result<Bytes> {
        self.encode_message(&WireMessage::Delta(delta.clone()))
    }

    pub fn encode_message(&self, message: &WireMessage) -> Result<Bytes> {
        let envelope = Envelope {
            v: self.protocol_version,
            message: message.clone(),
        };
        serde_json::to_vec(&envelope)
            .map(Bytes::from)
            .map_err(|e| VersioningError::SerializationError(e.to_string()))
    }

    pub fn decode_message(&self, bytes: &[u8]) -> Result<WireMessage> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.v == 0 || envelope.v > self.protocol_version {
            return Err(VersioningError::MalformedOperation(format!(
                "unsupported protocol version {}",
                envelope.v
            )));
        }
        Ok(envelope.message)
    }
}

impl WireMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            WireMessage::Operation(_) => "operation",
            WireMessage::Change(_) => "change",
            WireMessage::Delta(_) => "delta",
        }
    }
}
