use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use docset_core::{
    DocSetError, DocumentEvent, DocumentRecord, DocumentSetConfiguration, FsEntry, FsEntryKind,
    Location, RemoteAvailability, Result, ScanOutcome, ScanState, StorageFs, StorageRoots,
};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::bus::NotificationBus;
use crate::manifest::DocumentManifest;
use crate::migration::MigrationCoordinator;
use crate::paths;
use crate::policy::PolicyState;
use crate::registry::DocumentRegistry;

/// Everything a scan reads or updates. Shared with the manager.
pub struct ScanContext {
    pub config: Arc<RwLock<DocumentSetConfiguration>>,
    pub local_root: PathBuf,
    pub remote: Arc<dyn RemoteAvailability>,
    pub fs: Arc<dyn StorageFs>,
    pub registry: Arc<DocumentRegistry>,
    pub bus: Arc<NotificationBus>,
    pub migrator: Arc<MigrationCoordinator>,
    /// Set when the storage policy changed and documents may sit at the
    /// wrong location. Cleared by a scan that finishes with every
    /// disagreeing document migrated.
    pub policy_pending: Arc<AtomicBool>,
}

impl ScanContext {
    pub fn configuration(&self) -> DocumentSetConfiguration {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn roots(&self) -> StorageRoots {
        StorageRoots::snapshot(&self.local_root, self.remote.as_ref())
    }
}

/// Handle on a running or finished scan. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ScanHandle {
    id: String,
    outcome: watch::Receiver<Option<ScanOutcome>>,
}

impl ScanHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The outcome, if the scan has ended.
    pub fn outcome(&self) -> Option<ScanOutcome> {
        *self.outcome.borrow()
    }

    /// Wait for the scan to end.
    pub async fn wait(&self) -> ScanOutcome {
        let mut rx = self.outcome.clone();
        let outcome = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => (*outcome).unwrap_or(ScanOutcome::Cancelled),
            // The scan task went away without reporting
            Err(_) => ScanOutcome::Cancelled,
        };
        outcome
    }
}

struct ActiveScan {
    handle: ScanHandle,
    cancel: watch::Sender<bool>,
}

struct ScannerInner {
    ctx: Arc<ScanContext>,
    state: watch::Sender<ScanState>,
    active: Mutex<Option<ActiveScan>>,
}

impl ScannerInner {
    fn active(&self) -> MutexGuard<'_, Option<ActiveScan>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Asynchronous, cancellable discovery of documents under both roots.
///
/// `Idle -> Scanning -> Idle`; at most one scan runs at a time.
pub struct DocumentScanner {
    inner: Arc<ScannerInner>,
}

impl std::fmt::Debug for DocumentScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentScanner")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl DocumentScanner {
    pub fn new(ctx: Arc<ScanContext>) -> Self {
        let (state, _) = watch::channel(ScanState::Idle);
        Self {
            inner: Arc::new(ScannerInner {
                ctx,
                state,
                active: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ScanState {
        *self.inner.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ScanState> {
        self.inner.state.subscribe()
    }

    /// Start a scan, or return the handle of the one already running.
    ///
    /// `ScanStarted` is published before this returns. Must be called
    /// within a tokio runtime.
    pub fn start(&self) -> ScanHandle {
        let mut active = self.inner.active();
        if let Some(scan) = active.as_ref() {
            debug!("Scan {} already running", scan.handle.id);
            return scan.handle.clone();
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let handle = ScanHandle {
            id: uuid::Uuid::new_v4().to_string(),
            outcome: outcome_rx,
        };

        self.inner.state.send_replace(ScanState::Scanning);
        self.inner.ctx.bus.publish(DocumentEvent::ScanStarted);
        *active = Some(ActiveScan {
            handle: handle.clone(),
            cancel: cancel_tx,
        });
        drop(active);

        info!("Started document scan {}", handle.id);
        let inner = Arc::clone(&self.inner);
        let scan_id = handle.id.clone();
        tokio::spawn(async move {
            let outcome = run_scan(&inner.ctx, &scan_id, cancel_rx).await;

            // Publish the terminal event under the same lock `start` takes,
            // so a following scan's ScanStarted cannot overtake it.
            {
                let mut active = inner.active();
                *active = None;
                inner.state.send_replace(ScanState::Idle);
                inner.ctx.bus.publish(match outcome {
                    ScanOutcome::Finished => DocumentEvent::ScanFinished,
                    ScanOutcome::Cancelled => DocumentEvent::ScanCancelled,
                });
            }
            outcome_tx.send_replace(Some(outcome));
        });

        handle
    }

    /// Request cancellation of the running scan. Returns whether one was
    /// running. The scan stops before its next item.
    pub fn stop(&self) -> bool {
        match self.inner.active().as_ref() {
            Some(scan) => {
                info!("Stopping document scan {}", scan.handle.id);
                scan.cancel.send_replace(true);
                true
            }
            None => false,
        }
    }

    /// The running scan, if any.
    pub fn current(&self) -> Option<ScanHandle> {
        self.inner.active().as_ref().map(|scan| scan.handle.clone())
    }

    /// Run `f` while no scan can start. Fails with `ScanInProgress` if one
    /// is running.
    pub fn with_idle<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        let active = self.inner.active();
        if active.is_some() {
            return Err(DocSetError::ScanInProgress);
        }
        Ok(f())
    }
}

#[derive(Debug, Default)]
struct ScanStats {
    found: usize,
    relocated: usize,
    deleted: usize,
    migrated: usize,
    skipped: usize,
}

/// State of one scan pass.
struct Pass<'a> {
    ctx: &'a ScanContext,
    config: DocumentSetConfiguration,
    roots: StorageRoots,
    cancel: watch::Receiver<bool>,
    /// Target location when a policy reconciliation is due.
    policy: Option<Location>,
    policy_complete: bool,
    observed: HashMap<String, Location>,
    unreadable: HashSet<Location>,
    stats: ScanStats,
}

impl Pass<'_> {
    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

#[instrument(skip(ctx, cancel), level = "debug")]
async fn run_scan(ctx: &ScanContext, scan_id: &str, cancel: watch::Receiver<bool>) -> ScanOutcome {
    let config = ctx.configuration();
    let roots = ctx.roots();
    // Anything removed from here on was deleted while this scan ran and must
    // not be brought back from a stale listing
    ctx.registry.mark();
    let baseline = ctx.registry.all_identifiers();

    let mut policy = ctx
        .policy_pending
        .load(Ordering::SeqCst)
        .then(|| Location::preferred(config.prefer_remote_storage));
    let mut policy_complete = true;
    if policy == Some(Location::Remote) && !roots.remote_reachable() {
        warn!("Storage policy prefers remote storage but it is unreachable; not migrating");
        policy = None;
        policy_complete = false;
    }

    let mut pass = Pass {
        ctx,
        config,
        roots,
        cancel,
        policy,
        policy_complete,
        observed: HashMap::new(),
        unreadable: HashSet::new(),
        stats: ScanStats::default(),
    };

    let outcome = pass.run(&baseline).await;
    info!(
        "Scan {} {:?}: {} found, {} relocated, {} migrated, {} deleted, {} skipped",
        scan_id,
        outcome,
        pass.stats.found,
        pass.stats.relocated,
        pass.stats.migrated,
        pass.stats.deleted,
        pass.stats.skipped
    );

    if outcome == ScanOutcome::Finished && pass.policy.is_some() && pass.policy_complete {
        ctx.policy_pending.store(false, Ordering::SeqCst);
        debug!("Storage policy reconciliation complete");
        let state = PolicyState::new(pass.config.prefer_remote_storage);
        if let Err(e) = state
            .save(
                ctx.fs.as_ref(),
                &ctx.local_root,
                &pass.config.document_set_identifier,
            )
            .await
        {
            warn!("Failed to record applied storage policy: {}", e);
        }
    }
    outcome
}

impl Pass<'_> {
    async fn run(&mut self, baseline: &BTreeSet<String>) -> ScanOutcome {
        for location in [Location::Local, Location::Remote] {
            if self.cancelled() {
                return ScanOutcome::Cancelled;
            }
            let dir = match paths::documents_dir(&self.config, &self.roots, location) {
                Ok(dir) => dir,
                Err(_) => {
                    debug!("Remote storage unreachable, skipping remote enumeration");
                    continue;
                }
            };

            let entries = match self.ctx.fs.list_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("{}", DocSetError::ScanIo(format!("{}: {}", dir.display(), e)));
                    self.unreadable.insert(location);
                    continue;
                }
            };

            for entry in entries {
                if self.cancelled() {
                    return ScanOutcome::Cancelled;
                }
                self.visit(&entry, location).await;
            }
        }

        for identifier in baseline {
            if self.cancelled() {
                return ScanOutcome::Cancelled;
            }
            if !self.observed.contains_key(identifier) {
                self.check_vanished(identifier).await;
            }
        }

        ScanOutcome::Finished
    }

    /// Reconcile one storage item against the registry.
    async fn visit(&mut self, entry: &FsEntry, location: Location) {
        if paths::is_reserved_name(&self.config, &entry.name) {
            return;
        }
        let Some(identifier) = paths::identifier_from_file_name(&self.config, &entry.name) else {
            return;
        };

        if let Some(seen) = self.observed.get(&identifier) {
            if *seen != location {
                warn!(
                    "{} found in both {} and {} storage; keeping {}",
                    identifier, seen, location, seen
                );
            }
            return;
        }

        let display_name = match self.display_name(entry).await {
            Ok(name) => name,
            Err(e) => {
                warn!("{}", DocSetError::ScanIo(format!("{}: {}", entry.path.display(), e)));
                self.stats.skipped += 1;
                return;
            }
        };

        {
            let mut registry = self.ctx.registry.write();
            if registry.removed_since_mark(&identifier) {
                debug!("{} was deleted during the scan, skipping", identifier);
                return;
            }
            self.observed.insert(identifier.clone(), location);
            let event = match registry.get(&identifier) {
                None => {
                    let record = DocumentRecord::new(
                        &identifier,
                        display_name.unwrap_or_else(|| identifier.clone()),
                        location,
                    );
                    self.stats.found += 1;
                    Some((record, None))
                }
                Some(previous) if previous.location != location => {
                    let from = previous.location;
                    let relocated = previous.relocated(location);
                    let record = DocumentRecord {
                        display_name: display_name.unwrap_or(relocated.display_name),
                        ..relocated
                    };
                    self.stats.relocated += 1;
                    Some((record, Some(from)))
                }
                Some(previous) => match display_name {
                    Some(name) if name != previous.display_name => {
                        let record = DocumentRecord {
                            display_name: name,
                            ..previous
                        };
                        Some((record, Some(location)))
                    }
                    _ => None,
                },
            };

            if let Some((record, previous)) = event {
                registry.upsert(record.clone());
                self.ctx
                    .bus
                    .publish(DocumentEvent::DocumentFound { record, previous });
            }
        }

        if let Some(target) = self.policy {
            if target != location {
                self.migrate(&identifier, location, target).await;
            }
        }
    }

    /// Display name from the package manifest, if the item has one.
    async fn display_name(&self, entry: &FsEntry) -> Result<Option<String>> {
        if entry.kind != FsEntryKind::Directory {
            return Ok(None);
        }
        match DocumentManifest::load(self.ctx.fs.as_ref(), &entry.path).await {
            Ok(manifest) => Ok(manifest.map(|m| m.display_name)),
            Err(DocSetError::Serialization(msg)) => {
                debug!("Ignoring unreadable manifest: {}", msg);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn migrate(&mut self, identifier: &str, from: Location, target: Location) {
        let Some(record) = self.ctx.registry.get(identifier) else {
            return;
        };
        if record.location != from {
            return;
        }

        match self
            .ctx
            .migrator
            .migrate(&self.config, &self.roots, &record, target)
            .await
        {
            Ok(moved) => {
                let mut registry = self.ctx.registry.write();
                // Only record the move if nobody changed the record meanwhile
                if registry.get(identifier).map(|r| r.location) == Some(from) {
                    registry.upsert(moved.clone());
                    self.ctx.bus.publish(DocumentEvent::DocumentFound {
                        record: moved,
                        previous: Some(from),
                    });
                }
                drop(registry);
                self.observed.insert(identifier.to_string(), target);
                self.stats.migrated += 1;
            }
            Err(e) => {
                warn!("Policy migration of {} to {} failed: {}", identifier, target, e);
                self.policy_complete = false;
            }
        }
    }

    /// A registered document was not seen: drop it if its storage is gone.
    async fn check_vanished(&mut self, identifier: &str) {
        let Some(record) = self.ctx.registry.get(identifier) else {
            // Deleted through the manager while we were scanning
            return;
        };
        if self.unreadable.contains(&record.location) {
            return;
        }
        let url = match paths::resolve(&self.config, &self.roots, identifier, record.location) {
            Ok(url) => url,
            // Remote records are kept while the remote cannot be checked
            Err(_) => return,
        };
        match self.ctx.fs.exists(&url).await {
            Ok(false) => {}
            Ok(true) => return,
            Err(e) => {
                warn!("{}", DocSetError::ScanIo(format!("{}: {}", url.display(), e)));
                return;
            }
        }

        let mut registry = self.ctx.registry.write();
        if registry.get(identifier).as_ref() == Some(&record) {
            registry.remove(identifier);
            self.ctx.bus.publish(DocumentEvent::DocumentDeleted {
                identifier: identifier.to_string(),
                location: record.location,
            });
            self.stats.deleted += 1;
        }
    }
}
