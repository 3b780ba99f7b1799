//! Filesystem fakes for exercising races and I/O failures.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use docset_core::{DocSetError, FsEntry, FsEntryKind, Result, StorageFs};
use tokio::sync::oneshot;

use crate::fs::TokioFs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsOp {
    ListDir,
    Read,
    Rename,
}

/// Control side of a paused operation.
pub struct Gate {
    /// Fires once the gated call has completed and is holding.
    pub reached: oneshot::Receiver<()>,
    /// Lets the gated call return.
    pub release: oneshot::Sender<()>,
}

type Pause = (oneshot::Sender<()>, oneshot::Receiver<()>);

/// [`TokioFs`] that can hold one call until released, and fail reads.
#[derive(Default)]
pub struct FaultyFs {
    inner: TokioFs,
    gate: Option<(FsOp, usize)>,
    calls: AtomicUsize,
    pause: Mutex<Option<Pause>>,
    failing_reads: Option<String>,
}

impl FaultyFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the `nth` (1-based) call of `op` after it completes.
    pub fn gated(mut self, op: FsOp, nth: usize) -> (Self, Gate) {
        let (reached_tx, reached_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        self.gate = Some((op, nth));
        self.pause = Mutex::new(Some((reached_tx, release_rx)));
        (
            self,
            Gate {
                reached: reached_rx,
                release: release_tx,
            },
        )
    }

    /// Fail reads of any path containing `fragment` with an I/O error.
    pub fn failing_reads(mut self, fragment: impl Into<String>) -> Self {
        self.failing_reads = Some(fragment.into());
        self
    }

    async fn hold(&self, op: FsOp) {
        let Some((gated, nth)) = self.gate else {
            return;
        };
        if gated != op || self.calls.fetch_add(1, Ordering::SeqCst) + 1 != nth {
            return;
        }
        let pause = self.pause.lock().unwrap().take();
        if let Some((reached, release)) = pause {
            let _ = reached.send(());
            let _ = release.await;
        }
    }
}

#[async_trait]
impl StorageFs for FaultyFs {
    async fn list_dir(&self, dir: &Path) -> Result<Vec<FsEntry>> {
        let result = self.inner.list_dir(dir).await;
        self.hold(FsOp::ListDir).await;
        result
    }

    async fn stat(&self, path: &Path) -> Result<Option<FsEntryKind>> {
        self.inner.stat(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.inner.create_dir_all(path).await
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        if let Some(fragment) = &self.failing_reads {
            if path.to_string_lossy().contains(fragment.as_str()) {
                return Err(DocSetError::Io(format!(
                    "Failed to read {}: permission denied",
                    path.display()
                )));
            }
        }
        let result = self.inner.read(path).await;
        self.hold(FsOp::Read).await;
        result
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        self.inner.write(path, data).await
    }

    async fn copy_recursive(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.copy_recursive(from, to).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let result = self.inner.rename(from, to).await;
        self.hold(FsOp::Rename).await;
        result
    }

    async fn remove_recursive(&self, path: &Path) -> Result<bool> {
        self.inner.remove_recursive(path).await
    }
}
