//! Filesystem seam for the plaintext scratch directory.
//!
//! Every path the core passes in lies inside the scratch directory it was
//! configured with. Implementations report a missing path as
//! [`BridgeError::NotFound`](crate::BridgeError::NotFound): deletion and
//! sweeps treat that as success.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub size: u64,
    /// Unix seconds; `None` where the platform does not record creation.
    pub created_at: Option<i64>,
    /// Unix seconds.
    pub modified_at: Option<i64>,
    pub is_directory: bool,
}

impl FileMetadata {
    /// Age reference for garbage collection: creation time, else last write.
    pub fn birth_time(&self) -> Option<i64> {
        self.created_at.or(self.modified_at)
    }
}

/// Async file operations.
///
/// Desktop hosts use `tokio::fs` directly. Sandboxed mobile hosts map these
/// calls onto the app's private cache area.
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    async fn exists(&self, path: &Path) -> Result<bool>;

    async fn metadata(&self, path: &Path) -> Result<FileMetadata>;

    /// Create `path` and any missing parents.
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    async fn read_file(&self, path: &Path) -> Result<Bytes>;

    /// Create or truncate `path`, creating missing parents.
    async fn write_file(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Atomic within one directory; replaces `to` if present.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    async fn delete_file(&self, path: &Path) -> Result<()>;

    /// Immediate children of `path`, in no particular order.
    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>>;
}
