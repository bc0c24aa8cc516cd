//! Outbound wire format: the cloud-to-device message carrying one chunk.
//!
//! Body is UTF-8 JSON:
//!   {"filename", "chunk_index", "write_position", "total_chunks", "data"}
//! with `data` hex-encoded. `message_id` is `"{filename}_{chunk_index}"` so a
//! device can drop duplicates when a whole file is re-sent.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::plan::{ChunkPlan, ChunkRange};

/// One chunk of a file addressed to a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMessage {
    pub filename: String,
    pub chunk_index: u64,
    pub write_position: u64,
    pub total_chunks: u64,
    #[serde(with = "hex_bytes")]
    pub data: Bytes,
}

impl ChunkMessage {
    pub fn new(filename: &str, plan: &ChunkPlan, range: &ChunkRange, data: Bytes) -> Self {
        Self {
            filename: filename.to_string(),
            chunk_index: range.index,
            write_position: range.offset,
            total_chunks: plan.total_chunks,
            data,
        }
    }

    /// Deterministic id, stable across re-sends of the same chunk.
    pub fn message_id(&self) -> String {
        format!("{}_{}", self.filename, self.chunk_index)
    }

    /// Encode into an addressable channel message.
    pub fn to_outbound(&self) -> Result<OutboundMessage, serde_json::Error> {
        let body = serde_json::to_string(self)?;
        let mut properties = BTreeMap::new();
        properties.insert("chunk_index".to_string(), self.chunk_index.to_string());
        properties.insert("total_chunks".to_string(), self.total_chunks.to_string());
        Ok(OutboundMessage {
            message_id: self.message_id(),
            body,
            properties,
        })
    }
}

/// A message ready for the device channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: String,
    /// UTF-8 JSON body.
    pub body: String,
    /// Custom properties, values as decimal strings.
    pub properties: BTreeMap<String, String>,
}

impl OutboundMessage {
    /// Size counted against the channel's per-message limit.
    pub fn size(&self) -> usize {
        self.body.len()
            + self
                .properties
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }
}

mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
