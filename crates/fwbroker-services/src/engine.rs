//! Transfer engine: streams one blob to one device as ordered chunks.
//!
//! Per transfer:
//!   1. resolve the blob size (failure aborts before any chunk is sent)
//!   2. plan the chunks
//!   3. for each chunk in index order: read → encode → send → pace
//!
//! The first failing chunk aborts the transfer. Chunks already sent stay
//! sent; nothing is retried or rolled back. The engine keeps no state
//! between transfers.

use std::sync::Arc;

use fwbroker_core::{plan, ChunkMessage, PlanError};

use crate::blob::{BlobError, BlobFetcher};
use crate::channel::{DeviceChannel, SendError};
use crate::pacing::Pacer;

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub device_id: String,
    pub filename: String,
    pub total_size: u64,
    pub total_chunks: u64,
    pub chunks_sent: u64,
    /// Hex BLAKE3 of every delivered byte, in order.
    pub digest: String,
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("blob {filename} unavailable: {source}")]
    Blob {
        filename: String,
        #[source]
        source: BlobError,
    },
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("reading chunk {chunk_index} of {filename} failed: {source}")]
    ChunkRead {
        filename: String,
        chunk_index: u64,
        #[source]
        source: BlobError,
    },
    #[error("encoding chunk {chunk_index} of {filename} failed: {source}")]
    Encode {
        filename: String,
        chunk_index: u64,
        #[source]
        source: serde_json::Error,
    },
    #[error("sending chunk {chunk_index} of {filename} to {device_id} failed: {source}")]
    ChunkSend {
        device_id: String,
        filename: String,
        chunk_index: u64,
        #[source]
        source: SendError,
    },
}

impl TransferError {
    /// Index of the chunk the transfer aborted at, if it got that far.
    pub fn failed_chunk(&self) -> Option<u64> {
        match self {
            TransferError::Blob { .. } | TransferError::Plan(_) => None,
            TransferError::ChunkRead { chunk_index, .. }
            | TransferError::Encode { chunk_index, .. }
            | TransferError::ChunkSend { chunk_index, .. } => Some(*chunk_index),
        }
    }

    /// Chunks delivered before the abort. Chunks go out strictly in
    /// order, so this equals the failing index.
    pub fn chunks_sent(&self) -> u64 {
        self.failed_chunk().unwrap_or(0)
    }
}

pub struct TransferEngine {
    blobs: Arc<dyn BlobFetcher>,
    channel: Arc<dyn DeviceChannel>,
    pacer: Arc<dyn Pacer>,
}

impl TransferEngine {
    pub fn new(
        blobs: Arc<dyn BlobFetcher>,
        channel: Arc<dyn DeviceChannel>,
        pacer: Arc<dyn Pacer>,
    ) -> Self {
        Self {
            blobs,
            channel,
            pacer,
        }
    }

    /// Stream `filename` to `device_id` in `chunk_size` byte chunks.
    pub async fn transfer(
        &self,
        device_id: &str,
        filename: &str,
        chunk_size: u64,
    ) -> Result<TransferReport, TransferError> {
        let total_size = self
            .blobs
            .size(filename)
            .await
            .map_err(|source| TransferError::Blob {
                filename: filename.to_string(),
                source,
            })?;
        let plan = plan(total_size, chunk_size)?;

        tracing::info!(
            device_id,
            filename,
            total_size,
            chunk_size,
            total_chunks = plan.total_chunks,
            "transfer started"
        );

        let mut hasher = blake3::Hasher::new();
        for range in plan.ranges() {
            let chunk_error = |source: BlobError| TransferError::ChunkRead {
                filename: filename.to_string(),
                chunk_index: range.index,
                source,
            };

            let data = self
                .blobs
                .read(filename, range.offset, range.len)
                .await
                .map_err(chunk_error)?;
            // The blob shrank (or the store misbehaved) since size() was read.
            if data.len() as u64 != range.len {
                return Err(chunk_error(BlobError::ShortRead {
                    filename: filename.to_string(),
                    offset: range.offset,
                    expected: range.len,
                    actual: data.len() as u64,
                }));
            }
            hasher.update(&data);

            let chunk = ChunkMessage::new(filename, &plan, &range, data);
            let message = chunk.to_outbound().map_err(|source| TransferError::Encode {
                filename: filename.to_string(),
                chunk_index: range.index,
                source,
            })?;

            self.channel
                .send(device_id, &message)
                .await
                .map_err(|source| TransferError::ChunkSend {
                    device_id: device_id.to_string(),
                    filename: filename.to_string(),
                    chunk_index: range.index,
                    source,
                })?;

            let content_hash = hex::encode(&blake3::hash(&chunk.data).as_bytes()[..8]);
            tracing::info!(
                device_id,
                filename,
                chunk_index = range.index,
                total_chunks = plan.total_chunks,
                message_id = %message.message_id,
                message_size = message.size(),
                content_hash = %content_hash,
                "chunk sent"
            );

            self.pacer.pace().await;
        }

        let digest = hasher.finalize().to_hex().to_string();
        tracing::info!(
            device_id,
            filename,
            total_chunks = plan.total_chunks,
            digest = %digest,
            "transfer complete"
        );

        Ok(TransferReport {
            device_id: device_id.to_string(),
            filename: filename.to_string(),
            total_size,
            total_chunks: plan.total_chunks,
            chunks_sent: plan.total_chunks,
            digest,
        })
    }
}
