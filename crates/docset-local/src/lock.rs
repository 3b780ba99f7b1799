use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use docset_core::{DocSetError, Result};
use fs2::FileExt;
use tracing::debug;

/// File-based lock manager using OS-level exclusive file locking.
///
/// - Opens the lock file and takes an exclusive, non-blocking `flock`
/// - Holds the file handle for as long as the returned guard lives
/// - Dropping the guard releases the lock
/// - Process crash automatically releases the lock (OS closes descriptors)
///
/// Lock files are stored at `{locks_dir}/{resource}.lock`.
#[derive(Debug, Clone)]
pub struct FileLock {
    locks_dir: PathBuf,
    /// Resources locked by this process. `flock` semantics differ across
    /// platforms for a second open in the same process, so track them here.
    held: Arc<Mutex<HashSet<String>>>,
}

impl FileLock {
    /// Create a new FileLock keeping its lock files in `locks_dir`.
    pub fn new(locks_dir: impl AsRef<Path>) -> Self {
        Self {
            locks_dir: locks_dir.as_ref().to_path_buf(),
            held: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn lock_path(&self, resource: &str) -> PathBuf {
        self.locks_dir.join(format!("{}.lock", resource))
    }

    /// Try to lock `resource` without blocking.
    ///
    /// Returns `Ok(None)` if the lock is held, by this process or another.
    pub fn try_acquire(&self, resource: &str) -> Result<Option<LockGuard>> {
        {
            let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
            if !held.insert(resource.to_string()) {
                debug!("Lock on {} already held in this process", resource);
                return Ok(None);
            }
        }

        match self.lock_file(resource) {
            Ok(Some(file)) => {
                debug!("Acquired lock on {}", resource);
                Ok(Some(LockGuard {
                    resource: resource.to_string(),
                    file,
                    held: Arc::clone(&self.held),
                }))
            }
            other => {
                self.forget(resource);
                other.map(|_| None)
            }
        }
    }

    fn lock_file(&self, resource: &str) -> Result<Option<File>> {
        std::fs::create_dir_all(&self.locks_dir).map_err(|e| {
            DocSetError::Lock(format!(
                "Failed to create locks dir {}: {}",
                self.locks_dir.display(),
                e
            ))
        })?;

        let path = self.lock_path(resource);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| DocSetError::Lock(format!("Failed to open lock file: {}", e)))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                debug!("Lock on {} held by another process", resource);
                Ok(None)
            }
            Err(e) => Err(DocSetError::Lock(format!("Failed to acquire lock: {}", e))),
        }
    }

    fn forget(&self, resource: &str) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(resource);
    }
}

/// An acquired lock. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    resource: String,
    file: File,
    held: Arc<Mutex<HashSet<String>>>,
}

impl LockGuard {
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.resource);
        debug!("Released lock on {}", self.resource);
    }
}
