use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::Result;

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEntryKind {
    File,
    Directory,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    /// File name, lossily decoded.
    pub name: String,
    pub path: PathBuf,
    pub kind: FsEntryKind,
}

/// Filesystem primitives used by migrations and scans.
///
/// Kept behind a trait so storage manipulation can be exercised against
/// a fake filesystem. All I/O failures map to `DocSetError::Io`, except a
/// missing path where documented.
#[async_trait]
pub trait StorageFs: Send + Sync {
    /// List a directory. A missing directory lists as empty.
    async fn list_dir(&self, dir: &Path) -> Result<Vec<FsEntry>>;

    /// Stat a path. `None` when it does not exist.
    async fn stat(&self, path: &Path) -> Result<Option<FsEntryKind>>;

    /// Create a directory and all of its parents.
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// Read a whole file.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write a whole file atomically (temp file + rename).
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Copy a file or a directory tree. `to` must not exist.
    async fn copy_recursive(&self, from: &Path, to: &Path) -> Result<()>;

    /// Atomically rename `from` onto `to`.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Delete a file or directory tree. Returns whether anything existed.
    async fn remove_recursive(&self, path: &Path) -> Result<bool>;

    /// Whether a path exists.
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.stat(path).await?.is_some())
    }
}
