//! Filesystem helpers shared by the local backends.

use std::io::Write;
use std::path::{Component, Path};

use tempfile::NamedTempFile;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid name {name:?}: {reason}")]
pub struct InvalidName {
    pub name: String,
    pub reason: &'static str,
}

fn invalid(name: &str, reason: &'static str) -> InvalidName {
    InvalidName {
        name: name.to_string(),
        reason,
    }
}

/// Validate a relative path that must stay below its base directory.
///
/// Rejects empty names, absolute paths, `..` and Windows prefixes.
pub fn validate_relative(name: &str) -> Result<(), InvalidName> {
    if name.is_empty() {
        return Err(invalid(name, "empty"));
    }
    for component in Path::new(name).components() {
        match component {
            Component::ParentDir => return Err(invalid(name, "parent directory traversal")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid(name, "absolute path"))
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }
    Ok(())
}

/// Validate a name used as a single path segment (device id, partition id).
pub fn validate_segment(name: &str) -> Result<(), InvalidName> {
    validate_relative(name)?;
    if name.contains(['/', '\\']) || name == "." {
        return Err(invalid(name, "must be a single path segment"));
    }
    Ok(())
}

/// Atomic write: write to a uniquely named temp file beside `path`, fsync,
/// then rename over `path`. Concurrent writers to the same target never
/// share a temp file; the last rename wins.
pub async fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let path = path.to_path_buf();
    let data = data.to_vec();
    tokio::task::spawn_blocking(move || atomic_write_blocking(&path, &data))
        .await
        .map_err(std::io::Error::other)?
}

fn atomic_write_blocking(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
