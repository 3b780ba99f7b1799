use std::path::{Path, PathBuf};

use async_trait::async_trait;
use docset_core::{DocSetError, FsEntry, FsEntryKind, Result, StorageFs};
use tokio::fs;
use tracing::{debug, instrument};

/// `StorageFs` backed by `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct TokioFs;

impl TokioFs {
    pub fn new() -> Self {
        Self
    }
}

fn io_err(action: &str, path: &Path, e: std::io::Error) -> DocSetError {
    DocSetError::Io(format!("Failed to {} {}: {}", action, path.display(), e))
}

#[async_trait]
impl StorageFs for TokioFs {
    async fn list_dir(&self, dir: &Path) -> Result<Vec<FsEntry>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(io_err("read dir", dir, e)),
        };

        let mut listed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_err("read entry in", dir, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| io_err("get file type of", &path, e))?;
            let kind = if file_type.is_dir() {
                FsEntryKind::Directory
            } else {
                FsEntryKind::File
            };
            listed.push(FsEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                path,
                kind,
            });
        }

        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    async fn stat(&self, path: &Path) -> Result<Option<FsEntryKind>> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(FsEntryKind::Directory)),
            Ok(_) => Ok(Some(FsEntryKind::File)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err("stat", path, e)),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| io_err("create dir", path, e))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        match fs::read(path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(DocSetError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(io_err("read", path, e)),
        }
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            self.create_dir_all(parent).await?;
        }

        // Write atomically via temp file
        let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp_path = path.with_file_name(temp_name);
        fs::write(&temp_path, data)
            .await
            .map_err(|e| io_err("write", &temp_path, e))?;
        fs::rename(&temp_path, path)
            .await
            .map_err(|e| io_err("rename to", path, e))?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn copy_recursive(&self, from: &Path, to: &Path) -> Result<()> {
        if self.exists(to).await? {
            return Err(DocSetError::Io(format!(
                "Copy target {} already exists",
                to.display()
            )));
        }

        let mut pending: Vec<(PathBuf, PathBuf)> = vec![(from.to_path_buf(), to.to_path_buf())];
        let mut copied = 0usize;

        while let Some((src, dst)) = pending.pop() {
            match self.stat(&src).await? {
                None => return Err(DocSetError::NotFound(src.display().to_string())),
                Some(FsEntryKind::File) => {
                    if let Some(parent) = dst.parent() {
                        self.create_dir_all(parent).await?;
                    }
                    fs::copy(&src, &dst)
                        .await
                        .map_err(|e| io_err("copy", &src, e))?;
                    copied += 1;
                }
                Some(FsEntryKind::Directory) => {
                    self.create_dir_all(&dst).await?;
                    for entry in self.list_dir(&src).await? {
                        pending.push((entry.path, dst.join(&entry.name)));
                    }
                }
            }
        }

        debug!("Copied {} files from {} to {}", copied, from.display(), to.display());
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).await.map_err(|e| {
            DocSetError::Io(format!(
                "Failed to rename {} to {}: {}",
                from.display(),
                to.display(),
                e
            ))
        })
    }

    async fn remove_recursive(&self, path: &Path) -> Result<bool> {
        let result = match self.stat(path).await? {
            None => return Ok(false),
            Some(FsEntryKind::Directory) => fs::remove_dir_all(path).await,
            Some(FsEntryKind::File) => fs::remove_file(path).await,
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err("remove", path, e)),
        }
    }
}
