use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use docset_core::RemoteAvailability;
use tracing::info;

/// Remote storage backed by a directory, typically a folder kept in sync by
/// an external client (a mounted share, a sync-daemon folder, ...).
///
/// Reachability is a flag the host flips when the sync client reports
/// a change; [`DirectoryRemote::probe`] initializes it from the directory's
/// existence.
#[derive(Debug)]
pub struct DirectoryRemote {
    root: PathBuf,
    reachable: AtomicBool,
}

impl DirectoryRemote {
    pub fn new(root: impl Into<PathBuf>, reachable: bool) -> Self {
        Self {
            root: root.into(),
            reachable: AtomicBool::new(reachable),
        }
    }

    /// Reachable iff the root exists and is a directory right now.
    pub fn probe(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let reachable = root.is_dir();
        Self::new(root, reachable)
    }

    /// Remote storage that is never reachable.
    pub fn unavailable() -> Self {
        Self::new(PathBuf::new(), false)
    }

    pub fn set_reachable(&self, reachable: bool) {
        let was = self.reachable.swap(reachable, Ordering::SeqCst);
        if was != reachable {
            info!(
                "Remote storage {} is now {}",
                self.root.display(),
                if reachable { "reachable" } else { "unreachable" }
            );
        }
    }
}

impl RemoteAvailability for DirectoryRemote {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn remote_root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docset_core::StorageRoots;
    use tempfile::TempDir;

    #[test]
    fn test_probe() {
        let temp = TempDir::new().unwrap();
        assert!(DirectoryRemote::probe(temp.path()).is_reachable());
        assert!(!DirectoryRemote::probe(temp.path().join("missing")).is_reachable());
        assert!(!DirectoryRemote::unavailable().is_reachable());
    }

    #[test]
    fn test_snapshot_follows_flag() {
        let remote = DirectoryRemote::new("/cloud", true);
        let roots = StorageRoots::snapshot("/sandbox", &remote);
        assert_eq!(roots.remote, Some(PathBuf::from("/cloud")));

        remote.set_reachable(false);
        let roots = StorageRoots::snapshot("/sandbox", &remote);
        assert!(!roots.remote_reachable());
    }
}
