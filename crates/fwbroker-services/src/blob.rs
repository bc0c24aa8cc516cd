//! Blob fetching: size and ranged reads of named firmware blobs.
//!
//! Two stores:
//!   FsBlobStore: a container is a directory; reads seek and read the range
//!   MemoryBlobStore: in-process blobs for tests and dry runs

use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::fsutil::{validate_relative, InvalidName};

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error("read past end of {filename}: offset {offset} > size {size}")]
    OutOfRange {
        filename: String,
        offset: u64,
        size: u64,
    },
    #[error(
        "short read from {filename} at offset {offset}: expected {expected} bytes, got {actual}"
    )]
    ShortRead {
        filename: String,
        offset: u64,
        expected: u64,
        actual: u64,
    },
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
    #[error("storage error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read access to the blob container.
///
/// Implementations are shared across partitions, so they must be safe to
/// use concurrently. `read` clamps at end-of-object and rejects an offset
/// past it.
#[async_trait]
pub trait BlobFetcher: Send + Sync {
    async fn size(&self, filename: &str) -> Result<u64, BlobError>;

    async fn read(&self, filename: &str, offset: u64, length: u64) -> Result<Bytes, BlobError>;
}

fn clamp(filename: &str, size: u64, offset: u64, length: u64) -> Result<(usize, usize), BlobError> {
    if offset > size {
        return Err(BlobError::OutOfRange {
            filename: filename.to_string(),
            offset,
            size,
        });
    }
    let end = offset.saturating_add(length).min(size);
    Ok((offset as usize, end as usize))
}

// ── Filesystem ────────────────────────────────────────────────────────────────

/// Blob container backed by a directory: `{root}/{filename}`.
///
/// A blob truncated between reads yields fewer bytes than requested, which
/// the transfer engine reports as a short read.
#[derive(Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn blob_path(&self, filename: &str) -> Result<PathBuf, BlobError> {
        validate_relative(filename)?;
        Ok(self.root.join(filename))
    }

    fn not_found(filename: &str, e: std::io::Error) -> BlobError {
        if e.kind() == std::io::ErrorKind::NotFound {
            BlobError::NotFound(filename.to_string())
        } else {
            BlobError::Io(e)
        }
    }
}

#[async_trait]
impl BlobFetcher for FsBlobStore {
    async fn size(&self, filename: &str) -> Result<u64, BlobError> {
        let path = self.blob_path(filename)?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found(filename, e))?;
        if !meta.is_file() {
            return Err(BlobError::NotFound(filename.to_string()));
        }
        Ok(meta.len())
    }

    async fn read(&self, filename: &str, offset: u64, length: u64) -> Result<Bytes, BlobError> {
        let path = self.blob_path(filename)?;
        let filename = filename.to_string();
        tokio::task::spawn_blocking(move || {
            let mut file =
                std::fs::File::open(&path).map_err(|e| Self::not_found(&filename, e))?;
            let size = file.metadata()?.len();
            let (start, end) = clamp(&filename, size, offset, length)?;
            if start == end {
                return Ok(Bytes::new());
            }
            let len = (end - start) as u64;
            file.seek(SeekFrom::Start(start as u64))?;
            let mut buf = Vec::with_capacity(len as usize);
            file.take(len).read_to_end(&mut buf)?;
            Ok(Bytes::from(buf))
        })
        .await
        .map_err(|e| BlobError::Io(std::io::Error::other(e)))?
    }
}

// ── In-memory ─────────────────────────────────────────────────────────────────

/// In-memory blob container.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<DashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, filename: &str, data: impl Into<Bytes>) {
        self.blobs.insert(filename.to_string(), data.into());
    }

    pub fn remove(&self, filename: &str) {
        self.blobs.remove(filename);
    }
}

#[async_trait]
impl BlobFetcher for MemoryBlobStore {
    async fn size(&self, filename: &str) -> Result<u64, BlobError> {
        self.blobs
            .get(filename)
            .map(|b| b.len() as u64)
            .ok_or_else(|| BlobError::NotFound(filename.to_string()))
    }

    async fn read(&self, filename: &str, offset: u64, length: u64) -> Result<Bytes, BlobError> {
        let blob = self
            .blobs
            .get(filename)
            .map(|b| b.clone())
            .ok_or_else(|| BlobError::NotFound(filename.to_string()))?;
        let (start, end) = clamp(filename, blob.len() as u64, offset, length)?;
        Ok(blob.slice(start..end))
    }
}
