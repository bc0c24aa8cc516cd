//! Device channel: one addressed cloud-to-device message per call.
//!
//! A send is a single attempt. Retrying, pacing and aborting are the
//! transfer engine's business, not the channel's.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use fwbroker_core::connection::{ConnectionString, ConnectionStringError};
use fwbroker_core::OutboundMessage;

use crate::fsutil::{atomic_write, validate_segment, InvalidName};

/// Per-message limit of the cloud-to-device channel.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("message too large: {size} bytes > limit {limit}")]
    MessageTooLarge { size: usize, limit: usize },
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error(transparent)]
    InvalidDevice(#[from] InvalidName),
    #[error("transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait DeviceChannel: Send + Sync {
    async fn send(&self, device_id: &str, message: &OutboundMessage) -> Result<(), SendError>;
}

fn check_size(message: &OutboundMessage, limit: usize) -> Result<(), SendError> {
    let size = message.size();
    if size > limit {
        return Err(SendError::MessageTooLarge { size, limit });
    }
    Ok(())
}

// ── Spool ─────────────────────────────────────────────────────────────────────

/// Channel that spools every message to `{root}/{device_id}/{message_id}.json`.
///
/// A device gateway (or a test) picks the files up. Re-sending a chunk
/// overwrites the same file, mirroring message-id de-duplication. The
/// message id is percent-escaped (see [`spool_file_name`]) so distinct ids
/// never share a file.
#[derive(Clone)]
pub struct SpoolChannel {
    root: PathBuf,
    max_message_bytes: usize,
    /// Only deliver to devices whose spool directory already exists.
    require_registered: bool,
}

impl SpoolChannel {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            require_registered: false,
        }
    }

    /// Build from a hub connection string:
    /// `SpoolPath=...;MaxMessageBytes=...;RequireRegistered=true`.
    pub fn from_connection(cs: &ConnectionString) -> Result<Self, ConnectionStringError> {
        let mut channel = Self::new(cs.require("SpoolPath")?);
        if let Some(v) = cs.get("MaxMessageBytes") {
            channel.max_message_bytes = v.parse().map_err(|_| {
                ConnectionStringError::MalformedSegment(format!("MaxMessageBytes={v}"))
            })?;
        }
        if let Some(v) = cs.get("RequireRegistered") {
            channel.require_registered = v.eq_ignore_ascii_case("true") || v == "1";
        }
        Ok(channel)
    }

    pub fn with_max_message_bytes(mut self, limit: usize) -> Self {
        self.max_message_bytes = limit;
        self
    }

    pub fn require_registered(mut self, require: bool) -> Self {
        self.require_registered = require;
        self
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

/// Spool file name for a message id: `%`, `/` and `\\` are percent-escaped,
/// which keeps the mapping one-to-one.
pub fn spool_file_name(message_id: &str) -> String {
    let mut name = String::with_capacity(message_id.len() + 5);
    for c in message_id.chars() {
        match c {
            '%' => name.push_str("%25"),
            '/' => name.push_str("%2F"),
            '\\' => name.push_str("%5C"),
            c => name.push(c),
        }
    }
    name.push_str(".json");
    name
}

#[async_trait]
impl DeviceChannel for SpoolChannel {
    async fn send(&self, device_id: &str, message: &OutboundMessage) -> Result<(), SendError> {
        validate_segment(device_id)?;
        check_size(message, self.max_message_bytes)?;

        let device_dir = self.root.join(device_id);
        if self.require_registered && !tokio::fs::try_exists(&device_dir).await.unwrap_or(false) {
            return Err(SendError::DeviceNotFound(device_id.to_string()));
        }

        let file_name = spool_file_name(&message.message_id);
        let payload =
            serde_json::to_vec(message).map_err(|e| SendError::Transport(e.to_string()))?;
        atomic_write(&device_dir.join(file_name), &payload)
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        tracing::trace!(device_id, message_id = %message.message_id, "message spooled");
        Ok(())
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// Channel that keeps every message in memory, per device, in send order.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    sent: Arc<DashMap<String, Vec<OutboundMessage>>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent to a device, oldest first.
    pub fn sent(&self, device_id: &str) -> Vec<OutboundMessage> {
        self.sent
            .get(device_id)
            .map(|msgs| msgs.clone())
            .unwrap_or_default()
    }

    /// Total messages sent across all devices.
    pub fn count(&self) -> usize {
        self.sent.iter().map(|e| e.value().len()).sum()
    }
}

#[async_trait]
impl DeviceChannel for MemoryChannel {
    async fn send(&self, device_id: &str, message: &OutboundMessage) -> Result<(), SendError> {
        check_size(message, DEFAULT_MAX_MESSAGE_BYTES)?;
        self.sent
            .entry(device_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(())
    }
}
