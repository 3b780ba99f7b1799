use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use docset_core::{
    DocSetError, DocumentEvent, DocumentRecord, DocumentSetConfiguration, DocumentStore, Location,
    RemoteAvailability, Result, ScanState, StorageFs, StorageRoots, StoreHandle,
};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, instrument, warn};

use crate::bus::{DocumentSubscriber, NotificationBus, SubscriptionId};
use crate::fs::TokioFs;
use crate::lock::FileLock;
use crate::manifest::DocumentManifest;
use crate::migration::{lock_resource, MigrationCoordinator};
use crate::paths;
use crate::policy::PolicyState;
use crate::registry::DocumentRegistry;
use crate::scanner::{DocumentScanner, ScanContext, ScanHandle};
use crate::store::PackageStore;

/// Identifier generation gives up after this many collisions.
pub const MAX_IDENTIFIER_ATTEMPTS: usize = 8;

/// Hidden folder under the local root holding per-document lock files.
pub const LOCKS_DIR: &str = ".docset-locks";

type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

static SHARED: OnceLock<Arc<DocumentManager>> = OnceLock::new();

/// Builder for [`DocumentManager`]. Collaborators not supplied get the
/// local defaults: [`TokioFs`], [`PackageStore`] and UUID v4 identifiers.
pub struct DocumentManagerBuilder {
    config: DocumentSetConfiguration,
    local_root: PathBuf,
    remote: Arc<dyn RemoteAvailability>,
    fs: Option<Arc<dyn StorageFs>>,
    store: Option<Arc<dyn DocumentStore>>,
    id_generator: Option<IdGenerator>,
    locks_dir: Option<PathBuf>,
}

impl DocumentManagerBuilder {
    pub fn fs(mut self, fs: Arc<dyn StorageFs>) -> Self {
        self.fs = Some(fs);
        self
    }

    pub fn store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn id_generator(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_generator = Some(Box::new(generator));
        self
    }

    /// Defaults to `{local_root}/.docset-locks`.
    pub fn locks_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.locks_dir = Some(dir.into());
        self
    }

    /// Must be called within a tokio runtime.
    pub fn build(self) -> Result<DocumentManager> {
        let config = self.config.normalized()?;
        let fs: Arc<dyn StorageFs> = match self.fs {
            Some(fs) => fs,
            None => Arc::new(TokioFs::new()),
        };
        let store: Arc<dyn DocumentStore> = match self.store {
            Some(store) => store,
            None => Arc::new(PackageStore::new(fs.clone())),
        };
        let id_generator: IdGenerator = match self.id_generator {
            Some(generator) => generator,
            None => Box::new(|| uuid::Uuid::new_v4().to_string()),
        };
        let locks_dir = self
            .locks_dir
            .unwrap_or_else(|| self.local_root.join(LOCKS_DIR));
        let policy_pending = policy_differs(&self.local_root, &config);

        let ctx = Arc::new(ScanContext {
            config: Arc::new(RwLock::new(config)),
            local_root: self.local_root,
            remote: self.remote,
            fs: fs.clone(),
            registry: Arc::new(DocumentRegistry::new()),
            bus: Arc::new(NotificationBus::new()),
            migrator: Arc::new(MigrationCoordinator::new(fs, FileLock::new(locks_dir))),
            policy_pending: Arc::new(AtomicBool::new(policy_pending)),
        });

        if policy_pending {
            info!(
                "Storage policy prefers {} storage; next scan migrates documents",
                Location::preferred(ctx.configuration().prefer_remote_storage)
            );
        }
        info!(
            "Document manager for set {} (local root {})",
            ctx.configuration().document_set_identifier,
            ctx.local_root.display()
        );
        Ok(DocumentManager {
            scanner: DocumentScanner::new(ctx.clone()),
            ctx,
            store,
            id_generator,
        })
    }
}

/// Whether documents of `config`'s set were last reconciled to another
/// location than the one it prefers.
fn policy_differs(local_root: &Path, config: &DocumentSetConfiguration) -> bool {
    let preferred = Location::preferred(config.prefer_remote_storage);
    match PolicyState::applied_location(local_root, &config.document_set_identifier) {
        Ok(applied) => applied != preferred,
        Err(e) => {
            warn!("Cannot read applied storage policy, reconciling: {}", e);
            true
        }
    }
}

/// Owns a document set: where each document lives, how it moves, and what
/// subscribers hear about it.
pub struct DocumentManager {
    ctx: Arc<ScanContext>,
    scanner: DocumentScanner,
    store: Arc<dyn DocumentStore>,
    id_generator: IdGenerator,
}

impl std::fmt::Debug for DocumentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentManager")
            .field("local_root", &self.ctx.local_root)
            .field("documents", &self.ctx.registry.len())
            .field("scanner", &self.scanner)
            .finish_non_exhaustive()
    }
}

impl DocumentManager {
    pub fn builder(
        config: DocumentSetConfiguration,
        local_root: impl Into<PathBuf>,
        remote: Arc<dyn RemoteAvailability>,
    ) -> DocumentManagerBuilder {
        DocumentManagerBuilder {
            config,
            local_root: local_root.into(),
            remote,
            fs: None,
            store: None,
            id_generator: None,
            locks_dir: None,
        }
    }

    /// Install the process-wide manager. Fails if one is already installed.
    pub fn install_shared(manager: Arc<DocumentManager>) -> Result<Arc<DocumentManager>> {
        SHARED.set(manager.clone()).map_err(|_| {
            DocSetError::InvalidArgument("a shared document manager is already installed".into())
        })?;
        Ok(manager)
    }

    /// The process-wide manager, if one was installed.
    pub fn shared() -> Option<Arc<DocumentManager>> {
        SHARED.get().cloned()
    }

    // =========================================================================
    // Documents
    // =========================================================================

    /// Create an empty document at the policy location and return its
    /// identifier.
    #[instrument(skip(self), level = "debug")]
    pub async fn create_document(&self, display_name: &str) -> Result<String> {
        let config = self.ctx.configuration();
        let roots = self.ctx.roots();
        let location = Location::preferred(config.prefer_remote_storage);
        paths::root(&roots, location)?;

        for attempt in 1..=MAX_IDENTIFIER_ATTEMPTS {
            let identifier = (self.id_generator)();
            if self.ctx.registry.contains(&identifier) {
                debug!("Identifier {} already registered (attempt {})", identifier, attempt);
                continue;
            }
            let url = paths::resolve(&config, &roots, &identifier, location)?;
            if self.ctx.fs.exists(&url).await? {
                debug!("Storage for {} already exists (attempt {})", identifier, attempt);
                continue;
            }

            // Build the package under a hidden name so a scan never sees it
            // without its manifest
            let staging = paths::documents_dir(&config, &roots, location)?.join(format!(
                ".{}.{}.creating",
                identifier,
                uuid::Uuid::new_v4().simple()
            ));
            if let Err(e) = self.stage(&staging, &url, &identifier, display_name, &config).await {
                if let Err(cleanup) = self.ctx.fs.remove_recursive(&staging).await {
                    warn!("Failed to remove {}: {}", staging.display(), cleanup);
                }
                return Err(e);
            }

            let record = DocumentRecord::new(&identifier, display_name, location);
            {
                let mut registry = self.ctx.registry.write();
                // A scan may have registered the package since the rename
                if registry.get(&identifier).as_ref() != Some(&record) {
                    let previous = registry.upsert(record.clone()).map(|r| r.location);
                    self.ctx
                        .bus
                        .publish(DocumentEvent::DocumentFound { record, previous });
                }
            }
            info!("Created document {} at {}", identifier, url.display());
            return Ok(identifier);
        }

        Err(DocSetError::IdentifierCollision(format!(
            "no free identifier after {} attempts",
            MAX_IDENTIFIER_ATTEMPTS
        )))
    }

    async fn stage(
        &self,
        staging: &Path,
        url: &Path,
        identifier: &str,
        display_name: &str,
        config: &DocumentSetConfiguration,
    ) -> Result<()> {
        self.store
            .initialize_empty(staging, &config.store_options)
            .await?;
        DocumentManifest::new(identifier, display_name)
            .save(self.ctx.fs.as_ref(), staging)
            .await?;
        self.ctx.fs.rename(staging, url).await
    }

    /// Open a registered document's store.
    #[instrument(skip(self), level = "debug")]
    pub async fn open_document(&self, identifier: &str) -> Result<StoreHandle> {
        let record = self.record(identifier)?;
        let config = self.ctx.configuration();
        let url = paths::resolve(&config, &self.ctx.roots(), identifier, record.location)?;
        self.store.open(&url, &config.store_options).await
    }

    pub async fn close_document(&self, handle: StoreHandle) -> Result<()> {
        self.store.close(handle).await
    }

    /// Remove a document's storage and transaction logs.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_document(&self, identifier: &str) -> Result<()> {
        let record = self.record(identifier)?;
        let config = self.ctx.configuration();
        let roots = self.ctx.roots();
        let url = paths::resolve(&config, &roots, identifier, record.location)?;

        let resource = lock_resource(&config, identifier);
        let _guard = self.ctx.migrator.locks().try_acquire(&resource)?.ok_or_else(|| {
            DocSetError::Lock(format!("{} is being migrated", identifier))
        })?;

        self.ctx.fs.remove_recursive(&url).await?;
        let logs = paths::transaction_log_path(&config, &roots, identifier, record.location)?;
        if let Err(e) = self.ctx.fs.remove_recursive(&logs).await {
            warn!(
                "Deleted {} but failed to remove transaction logs {}: {}",
                identifier,
                logs.display(),
                e
            );
        }

        {
            let mut registry = self.ctx.registry.write();
            if let Some(removed) = registry.remove(identifier) {
                self.ctx.bus.publish(DocumentEvent::DocumentDeleted {
                    identifier: identifier.to_string(),
                    location: removed.location,
                });
            }
        }
        info!("Deleted document {} from {}", identifier, record.location);
        Ok(())
    }

    /// Change a document's display name.
    #[instrument(skip(self), level = "debug")]
    pub async fn rename_document(
        &self,
        identifier: &str,
        display_name: &str,
    ) -> Result<DocumentRecord> {
        let record = self.record(identifier)?;
        let config = self.ctx.configuration();
        let url = paths::resolve(&config, &self.ctx.roots(), identifier, record.location)?;

        let mut manifest = DocumentManifest::load(self.ctx.fs.as_ref(), &url)
            .await?
            .unwrap_or_else(|| DocumentManifest::new(identifier, display_name));
        manifest.display_name = display_name.to_string();
        manifest.save(self.ctx.fs.as_ref(), &url).await?;

        let mut registry = self.ctx.registry.write();
        let current = registry
            .get(identifier)
            .ok_or_else(|| DocSetError::NotFound(identifier.to_string()))?;
        let renamed = DocumentRecord {
            display_name: display_name.to_string(),
            ..current
        };
        registry.upsert(renamed.clone());
        self.ctx.bus.publish(DocumentEvent::DocumentFound {
            record: renamed.clone(),
            previous: Some(renamed.location),
        });
        Ok(renamed)
    }

    /// Move one document to `target`.
    #[instrument(skip(self), level = "debug")]
    pub async fn migrate_document(
        &self,
        identifier: &str,
        target: Location,
    ) -> Result<DocumentRecord> {
        let record = self.record(identifier)?;
        let config = self.ctx.configuration();
        let moved = self
            .ctx
            .migrator
            .migrate(&config, &self.ctx.roots(), &record, target)
            .await?;
        if moved.location == record.location {
            return Ok(moved);
        }

        let mut registry = self.ctx.registry.write();
        registry.upsert(moved.clone());
        self.ctx.bus.publish(DocumentEvent::DocumentFound {
            record: moved.clone(),
            previous: Some(record.location),
        });
        Ok(moved)
    }

    pub fn document(&self, identifier: &str) -> Option<DocumentRecord> {
        self.ctx.registry.get(identifier)
    }

    pub fn list_identifiers(&self) -> BTreeSet<String> {
        self.ctx.registry.all_identifiers()
    }

    /// Every registered document, ordered by identifier.
    pub fn documents(&self) -> Vec<DocumentRecord> {
        self.ctx.registry.records()
    }

    /// Storage URL of a registered document, at its current location.
    pub fn storage_url(&self, identifier: &str) -> Result<PathBuf> {
        let record = self.record(identifier)?;
        paths::resolve(
            &self.ctx.configuration(),
            &self.ctx.roots(),
            identifier,
            record.location,
        )
    }

    fn record(&self, identifier: &str) -> Result<DocumentRecord> {
        self.ctx
            .registry
            .get(identifier)
            .ok_or_else(|| DocSetError::NotFound(identifier.to_string()))
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    pub fn start_scan(&self) -> ScanHandle {
        self.scanner.start()
    }

    pub fn stop_scan(&self) -> bool {
        self.scanner.stop()
    }

    pub fn scan_state(&self) -> ScanState {
        self.scanner.state()
    }

    pub fn watch_scan_state(&self) -> watch::Receiver<ScanState> {
        self.scanner.watch_state()
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub fn configuration(&self) -> DocumentSetConfiguration {
        self.ctx.configuration()
    }

    pub fn roots(&self) -> StorageRoots {
        self.ctx.roots()
    }

    /// Replace the configuration. Rejected while a scan is running.
    ///
    /// Changing `prefer_remote_storage` makes the next scan move every
    /// document to the newly preferred location.
    pub fn reconfigure(&self, config: DocumentSetConfiguration) -> Result<()> {
        let config = config.normalized()?;
        self.scanner.with_idle(|| {
            let mut current = self
                .ctx
                .config
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if current.prefer_remote_storage != config.prefer_remote_storage
                || policy_differs(&self.ctx.local_root, &config)
            {
                self.ctx.policy_pending.store(true, Ordering::SeqCst);
                info!(
                    "Storage policy now prefers {}; next scan migrates documents",
                    Location::preferred(config.prefer_remote_storage)
                );
            }
            *current = config;
        })
    }

    /// Whether a storage policy change is waiting for a scan to apply it.
    pub fn policy_reconciliation_pending(&self) -> bool {
        self.ctx.policy_pending.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    pub fn subscribe(&self, subscriber: Arc<dyn DocumentSubscriber>) -> SubscriptionId {
        self.ctx.bus.subscribe(subscriber)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.ctx.bus.unsubscribe(id)
    }

    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<DocumentEvent>) {
        self.ctx.bus.subscribe_channel()
    }

    pub fn subscribe_stream(&self) -> (SubscriptionId, UnboundedReceiverStream<DocumentEvent>) {
        self.ctx.bus.subscribe_stream()
    }
}
