//! `FileSystemAccess` over `tokio::fs`.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{FileMetadata, FileSystemAccess},
};
use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::trace;

/// Direct filesystem access for desktop hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(path: &Path, e: io::Error) -> BridgeError {
    match e.kind() {
        io::ErrorKind::NotFound => BridgeError::NotFound(path.display().to_string()),
        _ => BridgeError::Io(e),
    }
}

fn unix_seconds(time: io::Result<SystemTime>) -> Option<i64> {
    let since_epoch = time.ok()?.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since_epoch.as_secs()).ok()
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(|e| io_error(path, e))
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let meta = fs::metadata(path).await.map_err(|e| io_error(path, e))?;
        Ok(FileMetadata {
            size: meta.len(),
            created_at: unix_seconds(meta.created()),
            modified_at: unix_seconds(meta.modified()),
            is_directory: meta.is_dir(),
        })
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path).await.map_err(|e| io_error(path, e))
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        let data = fs::read(path).await.map_err(|e| io_error(path, e))?;
        Ok(Bytes::from(data))
    }

    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }
        fs::write(path, data).await.map_err(|e| io_error(path, e))?;
        trace!(file = ?path.file_name(), bytes = data.len(), "Wrote file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await.map_err(|e| io_error(from, e))
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(|e| io_error(path, e))?;
        trace!(file = ?path.file_name(), "Deleted file");
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut dir = fs::read_dir(path).await.map_err(|e| io_error(path, e))?;
        let mut children = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_error(path, e))? {
            children.push(entry.path());
        }
        Ok(children)
    }
}
