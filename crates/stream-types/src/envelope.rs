//! # Message Envelopes
//!
//! Shapes exchanged between transports, codecs and tasks. Transports deal in
//! `Payload::Bytes`; codecs turn bytes into text or JSON values and back.
//! Intermediate streams additionally carry `Payload::Control` envelopes.

use serde::{Deserialize, Serialize};

use crate::entities::{SystemStream, SystemStreamPartition};

/// A message key or body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Undecoded bytes as carried by the transport.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Structured value.
    Json(serde_json::Value),
    /// Control envelope relayed on an intermediate stream.
    Control(ControlMessage),
}

impl Payload {
    /// Borrow the raw bytes, if the payload is still undecoded.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

/// A message read from an input partition.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingEnvelope {
    pub ssp: SystemStreamPartition,
    /// Transport-specific offset, opaque to the container.
    pub offset: String,
    pub key: Option<Payload>,
    pub message: Payload,
}

/// A message to be sent to an output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEnvelope {
    pub system_stream: SystemStream,
    /// Routing key for partition selection; defaults to the message key.
    pub partition_key: Option<Payload>,
    pub key: Option<Payload>,
    pub message: Payload,
}

impl OutgoingEnvelope {
    pub fn new(system_stream: SystemStream, key: Option<Payload>, message: Payload) -> Self {
        Self {
            system_stream,
            partition_key: None,
            key,
            message,
        }
    }
}

/// Control messages relayed on intermediate streams alongside data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Event-time progress reported by an upstream task.
    Watermark { task_name: String, timestamp: i64 },
    /// The upstream task has no more messages for this stream.
    EndOfStream { task_name: String },
}
