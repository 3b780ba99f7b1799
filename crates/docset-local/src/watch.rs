use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use docset_core::{DocSetError, Location, Result};
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::DocumentManager;
use crate::paths;

/// Quiet period after the last filesystem event before a rescan starts.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Triggers a rescan whenever something appears in or leaves a documents
/// directory.
///
/// Uses filesystem events (inotify on Linux, FSEvents on macOS, etc.).
/// Bursts are coalesced: one scan starts once the directories have been
/// quiet for the debounce period. The watcher stops when dropped.
pub struct RootWatcher {
    watched: Vec<PathBuf>,
    task: JoinHandle<()>,
    // Keep watcher alive (it stops when dropped)
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for RootWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootWatcher")
            .field("watched", &self.watched)
            .finish_non_exhaustive()
    }
}

impl RootWatcher {
    /// Watch the documents directories of `manager`'s current
    /// configuration. The local one is created if missing; an unreachable
    /// or missing remote one is skipped.
    pub fn start(manager: Arc<DocumentManager>, debounce: Duration) -> Result<Self> {
        let config = manager.configuration();
        let roots = manager.roots();

        let (tx, rx) = mpsc::unbounded_channel::<()>();
        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if is_relevant(&event) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => warn!("Watch error: {}", e),
            },
            Config::default(),
        )
        .map_err(|e| DocSetError::Io(format!("Failed to create watcher: {}", e)))?;

        let mut watched = Vec::new();
        for location in [Location::Local, Location::Remote] {
            let Ok(dir) = paths::documents_dir(&config, &roots, location) else {
                debug!("Not watching unreachable {} storage", location);
                continue;
            };
            if location == Location::Local {
                std::fs::create_dir_all(&dir).map_err(|e| {
                    DocSetError::Io(format!("Failed to create {}: {}", dir.display(), e))
                })?;
            } else if !dir.is_dir() {
                debug!("Not watching missing {}", dir.display());
                continue;
            }

            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|e| {
                    DocSetError::Io(format!("Failed to watch {}: {}", dir.display(), e))
                })?;
            info!("Watching {} storage at {}", location, dir.display());
            watched.push(dir);
        }

        let task = tokio::spawn(run_debounced(rx, debounce, move || {
            debug!("Documents changed, rescanning");
            manager.start_scan();
        }));

        Ok(Self {
            watched,
            task,
            _watcher: watcher,
        })
    }

    /// Directories being watched.
    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}

impl Drop for RootWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Items appearing, disappearing or being renamed. Hidden names belong to
/// in-flight migrations and temporary files.
fn is_relevant(event: &Event) -> bool {
    let structural = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
    );
    structural && event.paths.iter().any(|p| !is_hidden(p))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true)
}

/// Call `fire` once per burst of signals on `rx`, after `debounce` of quiet.
async fn run_debounced(
    mut rx: mpsc::UnboundedReceiver<()>,
    debounce: Duration,
    fire: impl Fn() + Send + 'static,
) {
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }
        fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::DirectoryRemote;
    use docset_core::{DocumentEvent, DocumentSetConfiguration};
    use notify::event::{CreateKind, RenameMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::time::timeout;

    #[tokio::test(start_paused = true)]
    async fn test_bursts_are_coalesced() {
        let (tx, rx) = mpsc::unbounded_channel();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let task = tokio::spawn(run_debounced(rx, Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..5 {
            tx.send(()).unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        drop(tx);
        task.await.unwrap();
    }

    #[test]
    fn test_relevant_events() {
        let create = Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/r/SET1/abc.doc"));
        assert!(is_relevant(&create));

        let staging = Event::new(EventKind::Create(CreateKind::Folder))
            .add_path(PathBuf::from("/r/SET1/.abc.1234.migrating"));
        assert!(!is_relevant(&staging));

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path(PathBuf::from("/r/SET1/.abc.1234.migrating"))
            .add_path(PathBuf::from("/r/SET1/abc.doc"));
        assert!(is_relevant(&rename));

        let data = Event::new(EventKind::Modify(ModifyKind::Any))
            .add_path(PathBuf::from("/r/SET1/abc.doc"));
        assert!(!is_relevant(&data));
    }

    #[tokio::test]
    async fn test_external_create_triggers_scan() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local");
        let config = DocumentSetConfiguration::default().with_document_set_identifier("SET1");
        let manager = Arc::new(
            DocumentManager::builder(config, &local, Arc::new(DirectoryRemote::unavailable()))
                .build()
                .unwrap(),
        );
        let (_, mut events) = manager.subscribe_channel();

        let watcher = RootWatcher::start(manager.clone(), Duration::from_millis(50)).unwrap();
        assert_eq!(watcher.watched(), &[local.join("SET1")]);

        std::fs::create_dir_all(local.join("SET1").join("abc")).unwrap();

        let found = timeout(Duration::from_secs(10), async {
            while let Some(event) = events.recv().await {
                if let DocumentEvent::DocumentFound { record, .. } = event {
                    return record;
                }
            }
            panic!("bus closed");
        })
        .await
        .expect("no scan picked up the new document");
        assert_eq!(found.identifier, "abc");
        assert_eq!(found.location, Location::Local);
    }
}
