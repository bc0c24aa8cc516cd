//! Partitioned event log: the source the stream consumer reads from.
//!
//! `EventSource` lists partitions and opens a receiver positioned just after
//! a checkpoint. Receivers yield events in partition order and wait for new
//! ones when caught up. `next` must be cancel-safe: the consumer races it
//! against shutdown.
//!
//! Two logs:
//!   JsonlEventLog: one newline-delimited JSON file per partition, tailed by polling
//!   MemoryEventLog: in-process partitions for tests

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Notify;

use fwbroker_core::{Position, PropertyValue, StreamEvent};

use crate::fsutil::{validate_relative, validate_segment, InvalidName};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(transparent)]
    InvalidPartition(#[from] InvalidName),
    #[error("partition {partition_id} shrank below offset {offset} (now {len} bytes)")]
    Truncated {
        partition_id: String,
        offset: u64,
        len: u64,
    },
    #[error("event log has no partitions")]
    NoPartitions,
    #[error("event encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("event log I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Partition ids, sorted.
    async fn partitions(&self) -> Result<Vec<String>, StreamError>;

    /// Open a partition. `after` is the last handled position; `None`
    /// starts from the first event.
    async fn open(
        &self,
        partition_id: &str,
        after: Option<Position>,
    ) -> Result<Box<dyn PartitionReceiver>, StreamError>;
}

#[async_trait]
pub trait PartitionReceiver: Send {
    /// Next event in partition order. Waits while the partition is caught up.
    async fn next(&mut self) -> Result<StreamEvent, StreamError>;
}

/// One stored event: application properties plus the body.
///
/// A string body is delivered as its UTF-8 bytes; any other JSON value is
/// delivered as its serialized text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
    pub body: serde_json::Value,
}

impl EventRecord {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            properties: HashMap::new(),
            body: serde_json::Value::String(body.into()),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    fn body_bytes(&self) -> Bytes {
        match &self.body {
            serde_json::Value::String(s) => Bytes::copy_from_slice(s.as_bytes()),
            other => Bytes::from(other.to_string()),
        }
    }

    fn into_event(self, partition_id: &str, position: Position) -> StreamEvent {
        StreamEvent {
            partition_id: partition_id.to_string(),
            position,
            body: self.body_bytes(),
            properties: self.properties,
        }
    }
}

// ── JSONL files ───────────────────────────────────────────────────────────────

/// Event log stored as `{root}/{partition_id}.jsonl`.
///
/// Sequence number is the line index, offset the byte offset of the line.
/// A line that is not an [`EventRecord`] is still delivered, with the raw
/// line as body, so it gets rejected downstream instead of stalling the
/// partition.
#[derive(Clone)]
pub struct JsonlEventLog {
    root: PathBuf,
    poll_interval: Duration,
}

impl JsonlEventLog {
    pub fn new(root: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            root: root.into(),
            poll_interval,
        }
    }

    /// Log for an event hub endpoint and path. `file://` endpoints are
    /// accepted as plain directories.
    pub fn from_endpoint(
        endpoint: &str,
        path: &str,
        poll_interval: Duration,
    ) -> Result<Self, InvalidName> {
        validate_relative(path)?;
        let base = endpoint.strip_prefix("file://").unwrap_or(endpoint);
        Ok(Self::new(Path::new(base).join(path), poll_interval))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_path(&self, partition_id: &str) -> Result<PathBuf, InvalidName> {
        validate_segment(partition_id)?;
        Ok(self.root.join(format!("{partition_id}.jsonl")))
    }

    /// Append one record to a partition, creating it if needed.
    pub async fn append(
        &self,
        partition_id: &str,
        record: &EventRecord,
    ) -> Result<(), StreamError> {
        let path = self.partition_path(partition_id)?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        tokio::fs::create_dir_all(&self.root).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl EventSource for JsonlEventLog {
    async fn partitions(&self) -> Result<Vec<String>, StreamError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut partitions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                partitions.push(stem.to_string());
            }
        }
        partitions.sort();
        Ok(partitions)
    }

    async fn open(
        &self,
        partition_id: &str,
        after: Option<Position>,
    ) -> Result<Box<dyn PartitionReceiver>, StreamError> {
        let path = self.partition_path(partition_id)?;
        // Resume by re-reading the checkpointed line and dropping it.
        let (offset, next_seq, skip_through) = match after {
            Some(p) => (p.offset, p.sequence_number, Some(p.sequence_number)),
            None => (0, 0, None),
        };
        Ok(Box::new(JsonlReceiver {
            path,
            partition_id: partition_id.to_string(),
            offset,
            next_seq,
            skip_through,
            pending: VecDeque::new(),
            poll_interval: self.poll_interval,
        }))
    }
}

struct JsonlReceiver {
    path: PathBuf,
    partition_id: String,
    /// Byte offset of the first unread line.
    offset: u64,
    next_seq: u64,
    skip_through: Option<u64>,
    pending: VecDeque<StreamEvent>,
    poll_interval: Duration,
}

impl JsonlReceiver {
    async fn read_tail(&self) -> Result<Vec<u8>, StreamError> {
        let mut file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            // Partition not created yet: nothing to read.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();
        if len < self.offset {
            return Err(StreamError::Truncated {
                partition_id: self.partition_id.clone(),
                offset: self.offset,
                len,
            });
        }
        file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        let mut data = Vec::with_capacity((len - self.offset) as usize);
        file.read_to_end(&mut data).await?;
        Ok(data)
    }

    /// Read complete lines past `offset` into `pending`.
    ///
    /// State is only touched after the last await, so dropping this future
    /// loses nothing.
    async fn fill(&mut self) -> Result<(), StreamError> {
        let data = self.read_tail().await?;

        let mut consumed = 0usize;
        while let Some(newline) = data[consumed..].iter().position(|&b| b == b'\n') {
            let line = &data[consumed..consumed + newline];
            let offset = self.offset + consumed as u64;
            let sequence_number = self.next_seq;
            consumed += newline + 1;
            self.next_seq += 1;

            if self.skip_through.is_some_and(|s| sequence_number <= s) {
                continue;
            }
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            let position = Position {
                sequence_number,
                offset,
            };
            self.pending
                .push_back(parse_line(&self.partition_id, position, line));
        }
        // An unterminated last line is still being written.
        self.offset += consumed as u64;
        Ok(())
    }
}

fn parse_line(partition_id: &str, position: Position, line: &[u8]) -> StreamEvent {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    match serde_json::from_slice::<EventRecord>(line) {
        Ok(record) => record.into_event(partition_id, position),
        Err(e) => {
            tracing::debug!(
                partition_id,
                sequence_number = position.sequence_number,
                error = %e,
                "malformed log record, delivering raw line"
            );
            StreamEvent {
                partition_id: partition_id.to_string(),
                position,
                properties: HashMap::new(),
                body: Bytes::copy_from_slice(line),
            }
        }
    }
}

#[async_trait]
impl PartitionReceiver for JsonlReceiver {
    async fn next(&mut self) -> Result<StreamEvent, StreamError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }
            self.fill().await?;
            if self.pending.is_empty() {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// In-process log. Sequence number and offset are both the event's index.
#[derive(Clone, Default)]
pub struct MemoryEventLog {
    partitions: Arc<DashMap<String, Vec<StreamEvent>>>,
    appended: Arc<Notify>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty partition.
    pub fn add_partition(&self, partition_id: &str) {
        self.partitions.entry(partition_id.to_string()).or_default();
    }

    pub fn push(&self, partition_id: &str, record: EventRecord) -> Position {
        let position = {
            let mut events = self.partitions.entry(partition_id.to_string()).or_default();
            let index = events.len() as u64;
            let position = Position {
                sequence_number: index,
                offset: index,
            };
            events.push(record.into_event(partition_id, position.clone()));
            position
        };
        self.appended.notify_waiters();
        position
    }
}

#[async_trait]
impl EventSource for MemoryEventLog {
    async fn partitions(&self) -> Result<Vec<String>, StreamError> {
        let mut ids: Vec<String> = self.partitions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }

    async fn open(
        &self,
        partition_id: &str,
        after: Option<Position>,
    ) -> Result<Box<dyn PartitionReceiver>, StreamError> {
        Ok(Box::new(MemoryReceiver {
            log: self.clone(),
            partition_id: partition_id.to_string(),
            next: after.map(|p| p.sequence_number + 1).unwrap_or(0) as usize,
        }))
    }
}

struct MemoryReceiver {
    log: MemoryEventLog,
    partition_id: String,
    next: usize,
}

impl MemoryReceiver {
    fn peek(&self) -> Option<StreamEvent> {
        self.log
            .partitions
            .get(&self.partition_id)
            .and_then(|events| events.get(self.next).cloned())
    }
}

#[async_trait]
impl PartitionReceiver for MemoryReceiver {
    async fn next(&mut self) -> Result<StreamEvent, StreamError> {
        loop {
            // Register before checking so a push in between is not missed.
            let appended = self.log.appended.notified();
            if let Some(event) = self.peek() {
                self.next += 1;
                return Ok(event);
            }
            appended.await;
        }
    }
}
