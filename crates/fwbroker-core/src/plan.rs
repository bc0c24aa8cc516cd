//! Chunk planning: deterministic split of a blob into addressable ranges.

/// Ordered chunk layout for one transfer. Recomputed for every transfer;
/// the blob may have changed size since the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

/// Byte range of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u64,
    /// Also the chunk's `write_position` on the device.
    pub offset: u64,
    /// `chunk_size`, except for a short final chunk.
    pub len: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("chunk_size must be positive")]
    ZeroChunkSize,
}

/// Compute the chunk plan: `total_chunks = ceil(total_size / chunk_size)`.
/// A zero-length blob yields zero chunks.
pub fn plan(total_size: u64, chunk_size: u64) -> Result<ChunkPlan, PlanError> {
    if chunk_size == 0 {
        return Err(PlanError::ZeroChunkSize);
    }
    Ok(ChunkPlan {
        total_size,
        chunk_size,
        total_chunks: total_size.div_ceil(chunk_size),
    })
}

impl ChunkPlan {
    /// Range of chunk `index`, or `None` past the end of the plan.
    pub fn range(&self, index: u64) -> Option<ChunkRange> {
        if index >= self.total_chunks {
            return None;
        }
        let offset = index * self.chunk_size;
        Some(ChunkRange {
            index,
            offset,
            len: self.chunk_size.min(self.total_size - offset),
        })
    }

    /// All ranges in strictly increasing index order.
    pub fn ranges(&self) -> impl Iterator<Item = ChunkRange> + '_ {
        (0..self.total_chunks).filter_map(move |i| self.range(i))
    }
}
