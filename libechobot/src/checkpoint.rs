//! Durable offset checkpoint
//!
//! The offset is a single positive integer stored as one text line. Writes go
//! to a sibling temp file that is fsynced and renamed over the original, and
//! on Unix the containing directory is fsynced after the rename, so a crash
//! leaves either the old or the new value on disk.

use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::{Result, StorageError};

#[derive(Debug, Clone)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the stored offset.
    ///
    /// Returns `None` when the file is missing, empty, unparsable or holds a
    /// non-positive value; the caller then discovers a fresh starting point.
    pub async fn read(&self) -> Result<Option<u64>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "Offset file not found");
                return Ok(None);
            }
            Err(e) => return Err(StorageError::io(&self.path, e).into()),
        };

        let line = content.lines().next().unwrap_or("").trim();
        match line.parse::<i64>() {
            Ok(offset) if offset > 0 => {
                info!(offset, "Using offset from file");
                Ok(Some(offset as u64))
            }
            _ => {
                warn!(path = %self.path.display(), value = line, "Offset from file is not valid");
                Ok(None)
            }
        }
    }

    /// Persist `offset`, returning only once it is on stable storage
    pub async fn write(&self, offset: u64) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StorageError::io(parent, e))?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        let io_err = |e| StorageError::io(&tmp, e);

        let mut file = tokio::fs::File::create(&tmp).await.map_err(io_err)?;
        file.write_all(format!("{}\n", offset).as_bytes())
            .await
            .map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageError::io(&self.path, e))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        sync_dir(dir).await
    }
}

/// Flush a directory entry change (the rename) to disk
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<()> {
    let handle = tokio::fs::File::open(dir)
        .await
        .map_err(|e| StorageError::io(dir, e))?;
    handle
        .sync_all()
        .await
        .map_err(|e| StorageError::io(dir, e))?;
    Ok(())
}

// No directory handle to sync outside Unix
#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
