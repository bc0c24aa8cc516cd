//! Stream events and checkpoints: what the partitioned event log hands us
//! and what we hand back to mark progress.

use std::collections::HashMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Partition-scoped position of an event in the log.
///
/// Opaque to everything but the event log backend that produced it.
/// `sequence_number` is strictly increasing within a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub sequence_number: u64,
    /// Backend-specific offset of the event (byte offset for file logs).
    pub offset: u64,
}

/// Value of an application property attached to an event.
///
/// Producers on some SDKs attach properties as raw bytes, so both shapes
/// have to be accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Text(String),
    Binary(Vec<u8>),
}

impl PropertyValue {
    /// Decode the value as UTF-8 text.
    pub fn as_utf8(&self) -> Result<&str, std::str::Utf8Error> {
        match self {
            PropertyValue::Text(s) => Ok(s),
            PropertyValue::Binary(b) => std::str::from_utf8(b),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Text(s.to_string())
    }
}

/// One event delivered by the partitioned stream.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub partition_id: String,
    pub position: Position,
    pub properties: HashMap<String, PropertyValue>,
    pub body: Bytes,
}

impl StreamEvent {
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Checkpoint that marks this event as handled.
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            partition_id: self.partition_id.clone(),
            position: self.position.clone(),
        }
    }
}

/// Durable marker of the last handled position in one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub partition_id: String,
    pub position: Position,
}
