//! Checkpoint stores: last handled position per partition.
//!
//! The consumer saves after every handled event and loads once per
//! subscription. A missing checkpoint means "start from the beginning".

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use fwbroker_core::{Checkpoint, Position};

use crate::fsutil::{atomic_write, validate_relative, validate_segment, InvalidName};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error(transparent)]
    InvalidPartition(#[from] InvalidName),
    #[error("checkpoint {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("checkpoint for partition {partition_id} belongs to {found}")]
    Mismatch { partition_id: String, found: String },
    #[error("checkpoint storage error: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, partition_id: &str) -> Result<Option<Position>, CheckpointError>;

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;
}

// ── Filesystem ────────────────────────────────────────────────────────────────

/// One JSON file per partition: `{root}/{partition_id}.json`.
#[derive(Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store scoped to one event path and consumer group below `base`:
    /// `{base}/checkpoint/{event_path}/{consumer_group}`.
    pub fn for_group(
        base: &Path,
        event_path: &str,
        consumer_group: &str,
    ) -> Result<Self, InvalidName> {
        validate_relative(event_path)?;
        validate_segment(consumer_group)?;
        Ok(Self::new(
            base.join("checkpoint").join(event_path).join(consumer_group),
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, partition_id: &str) -> Result<PathBuf, InvalidName> {
        validate_segment(partition_id)?;
        Ok(self.root.join(format!("{partition_id}.json")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, partition_id: &str) -> Result<Option<Position>, CheckpointError> {
        let path = self.path_for(partition_id)?;
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_slice(&data)
            .map_err(|source| CheckpointError::Corrupt { path, source })?;
        if checkpoint.partition_id != partition_id {
            return Err(CheckpointError::Mismatch {
                partition_id: partition_id.to_string(),
                found: checkpoint.partition_id,
            });
        }
        Ok(Some(checkpoint.position))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(&checkpoint.partition_id)?;
        let data = serde_json::to_vec(checkpoint)?;
        atomic_write(&path, &data).await?;
        Ok(())
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct MemoryCheckpointStore {
    positions: Arc<DashMap<String, Position>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current position for a partition, for assertions.
    pub fn get(&self, partition_id: &str) -> Option<Position> {
        self.positions.get(partition_id).map(|p| p.clone())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, partition_id: &str) -> Result<Option<Position>, CheckpointError> {
        Ok(self.get(partition_id))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.positions
            .insert(checkpoint.partition_id.clone(), checkpoint.position.clone());
        Ok(())
    }
}
