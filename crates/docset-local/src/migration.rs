use std::path::{Path, PathBuf};
use std::sync::Arc;

use docset_core::{
    DocSetError, DocumentRecord, DocumentSetConfiguration, FsEntryKind, Location, Result,
    StorageFs, StorageRoots,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::lock::FileLock;
use crate::paths;

/// Moves a document's storage between Local and Remote.
///
/// The coordinator only manipulates storage. It never touches the registry;
/// callers record the returned `DocumentRecord` once `migrate` succeeds.
pub struct MigrationCoordinator {
    fs: Arc<dyn StorageFs>,
    locks: FileLock,
}

impl std::fmt::Debug for MigrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationCoordinator")
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

impl MigrationCoordinator {
    pub fn new(fs: Arc<dyn StorageFs>, locks: FileLock) -> Self {
        Self { fs, locks }
    }

    /// Per-document locks, shared with operations that must not overlap a
    /// migration.
    pub fn locks(&self) -> &FileLock {
        &self.locks
    }

    /// Move `record`'s storage to `target`.
    ///
    /// Storage is copied to a hidden temporary item beside the target,
    /// verified, then renamed into place. Only after the rename succeeds is
    /// the source (storage and transaction logs) removed. Any failure before
    /// that point removes the temporary copy and leaves the source untouched.
    #[instrument(skip(self, config, roots, record), level = "debug", fields(identifier = %record.identifier, from = %record.location))]
    pub async fn migrate(
        &self,
        config: &DocumentSetConfiguration,
        roots: &StorageRoots,
        record: &DocumentRecord,
        target: Location,
    ) -> Result<DocumentRecord> {
        if record.location == target {
            return Ok(record.clone());
        }

        // Fails with RemoteStorageUnavailable before any disk access when
        // either side is an unreachable remote.
        let source_url = paths::resolve(config, roots, &record.identifier, record.location)?;
        let target_url = paths::resolve(config, roots, &record.identifier, target)?;
        if source_url == target_url {
            return Ok(record.relocated(target));
        }

        let resource = lock_resource(config, &record.identifier);
        let _guard = self.locks.try_acquire(&resource)?.ok_or_else(|| {
            DocSetError::migration_failed(
                &record.identifier,
                target,
                "another migration of this document is in progress",
            )
        })?;

        if !self.fs.exists(&source_url).await? {
            return Err(DocSetError::NotFound(format!(
                "{} has no storage at {}",
                record.identifier,
                source_url.display()
            )));
        }
        if self.fs.exists(&target_url).await? {
            return Err(DocSetError::migration_failed(
                &record.identifier,
                target,
                format!("{} already exists", target_url.display()),
            ));
        }

        let target_dir = paths::documents_dir(config, roots, target)?;
        self.fs.create_dir_all(&target_dir).await.map_err(|e| {
            DocSetError::migration_failed(&record.identifier, target, e.to_string())
        })?;

        let temp_url = target_dir.join(format!(
            ".{}.{}.migrating",
            record.identifier,
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = self.stage(&source_url, &temp_url).await {
            self.discard(&temp_url).await;
            return Err(DocSetError::migration_failed(
                &record.identifier,
                target,
                e.to_string(),
            ));
        }

        if let Err(e) = self.fs.rename(&temp_url, &target_url).await {
            self.discard(&temp_url).await;
            return Err(DocSetError::migration_failed(
                &record.identifier,
                target,
                e.to_string(),
            ));
        }

        // The document now lives at the target. Leftovers at the source are
        // logged rather than failing a migration that already happened.
        if let Err(e) = self.fs.remove_recursive(&source_url).await {
            warn!(
                "Migrated {} but failed to remove source {}: {}",
                record.identifier,
                source_url.display(),
                e
            );
        }
        let source_logs =
            paths::transaction_log_path(config, roots, &record.identifier, record.location)?;
        if let Err(e) = self.fs.remove_recursive(&source_logs).await {
            warn!(
                "Migrated {} but failed to remove transaction logs {}: {}",
                record.identifier,
                source_logs.display(),
                e
            );
        }

        info!(
            "Migrated {} from {} to {}",
            record.identifier, record.location, target
        );
        Ok(record.relocated(target))
    }

    /// Copy `source` to `temp` and check the copy matches byte for byte.
    async fn stage(&self, source: &Path, temp: &Path) -> Result<()> {
        self.fs.copy_recursive(source, temp).await?;
        let expected = tree_digest(self.fs.as_ref(), source).await?;
        let actual = tree_digest(self.fs.as_ref(), temp).await?;
        if expected != actual {
            return Err(DocSetError::Io(format!(
                "copy of {} does not match source (sha256 {} != {})",
                source.display(),
                actual,
                expected
            )));
        }
        debug!("Staged {} as {} (sha256 {})", source.display(), temp.display(), actual);
        Ok(())
    }

    async fn discard(&self, temp: &Path) {
        if let Err(e) = self.fs.remove_recursive(temp).await {
            warn!("Failed to remove temporary {}: {}", temp.display(), e);
        }
    }
}

/// Lock resource name guarding one document's storage.
pub fn lock_resource(config: &DocumentSetConfiguration, identifier: &str) -> String {
    format!("{}.{}", config.document_set_identifier, identifier)
}

/// SHA-256 over a file or directory tree: relative names, kinds and
/// contents, walked in name order.
pub async fn tree_digest(fs: &dyn StorageFs, path: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut pending: Vec<(PathBuf, String)> = vec![(path.to_path_buf(), String::new())];

    while let Some((current, relative)) = pending.pop() {
        match fs.stat(&current).await? {
            None => return Err(DocSetError::NotFound(current.display().to_string())),
            Some(FsEntryKind::File) => {
                let data = fs.read(&current).await?;
                hasher.update(b"f:");
                hasher.update(relative.as_bytes());
                hasher.update((data.len() as u64).to_le_bytes());
                hasher.update(&data);
            }
            Some(FsEntryKind::Directory) => {
                hasher.update(b"d:");
                hasher.update(relative.as_bytes());
                let mut entries = fs.list_dir(&current).await?;
                entries.sort_by(|a, b| a.name.cmp(&b.name));
                for entry in entries.into_iter().rev() {
                    let child = format!("{}/{}", relative, entry.name);
                    pending.push((entry.path, child));
                }
            }
        }
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::TokioFs;
    use async_trait::async_trait;
    use docset_core::FsEntry;
    use tempfile::TempDir;

    struct Env {
        _temp: TempDir,
        config: DocumentSetConfiguration,
        roots: StorageRoots,
        coordinator: MigrationCoordinator,
    }

    fn env_with(fs: Arc<dyn StorageFs>) -> Env {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local");
        let remote = temp.path().join("remote");
        std::fs::create_dir_all(&local).unwrap();
        std::fs::create_dir_all(&remote).unwrap();
        let config = DocumentSetConfiguration::default()
            .with_document_set_identifier("SET1")
            .with_documents_subfolder("Docs")
            .with_documents_extension(".doc")
            .normalized()
            .unwrap();
        let locks = FileLock::new(temp.path().join("locks"));
        Env {
            roots: StorageRoots::new(local, Some(remote)),
            config,
            coordinator: MigrationCoordinator::new(fs, locks),
            _temp: temp,
        }
    }

    fn env() -> Env {
        env_with(Arc::new(TokioFs::new()))
    }

    /// Write a package with a nested store file and a transaction log.
    fn seed(env: &Env, id: &str, location: Location) -> PathBuf {
        let url = paths::resolve(&env.config, &env.roots, id, location).unwrap();
        std::fs::create_dir_all(url.join("StoreContent")).unwrap();
        std::fs::write(url.join("StoreContent/persistentStore"), b"rows: 1,2,3").unwrap();
        std::fs::write(url.join("DocumentMetadata.json"), b"{\"name\":\"n\"}").unwrap();
        let logs = paths::transaction_log_path(&env.config, &env.roots, id, location).unwrap();
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("0001.log"), b"txn").unwrap();
        url
    }

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .filter(|n| n.starts_with('.'))
                    .collect()
            })
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_round_trip_preserves_bytes() {
        let env = env();
        let url = seed(&env, "abc", Location::Local);
        let fs = TokioFs::new();
        let before = tree_digest(&fs, &url).await.unwrap();
        let record = DocumentRecord::new("abc", "n", Location::Local);

        let remote = env
            .coordinator
            .migrate(&env.config, &env.roots, &record, Location::Remote)
            .await
            .unwrap();
        assert_eq!(remote.location, Location::Remote);
        assert!(!url.exists());
        let remote_url = paths::resolve(&env.config, &env.roots, "abc", Location::Remote).unwrap();
        assert!(remote_url.is_dir());

        let back = env
            .coordinator
            .migrate(&env.config, &env.roots, &remote, Location::Local)
            .await
            .unwrap();
        assert_eq!(back, record);
        assert_eq!(
            paths::resolve(&env.config, &env.roots, &back.identifier, back.location).unwrap(),
            url
        );
        assert_eq!(tree_digest(&fs, &url).await.unwrap(), before);
        assert_eq!(
            std::fs::read(url.join("StoreContent/persistentStore")).unwrap(),
            b"rows: 1,2,3"
        );
    }

    #[tokio::test]
    async fn test_source_transaction_logs_removed() {
        let env = env();
        seed(&env, "abc", Location::Local);
        let logs = paths::transaction_log_path(&env.config, &env.roots, "abc", Location::Local)
            .unwrap();
        assert!(logs.exists());

        let record = DocumentRecord::new("abc", "n", Location::Local);
        env.coordinator
            .migrate(&env.config, &env.roots, &record, Location::Remote)
            .await
            .unwrap();
        assert!(!logs.exists());
    }

    #[tokio::test]
    async fn test_unreachable_remote_leaves_source_untouched() {
        let env = env();
        let url = seed(&env, "abc", Location::Local);
        let before = std::fs::read(url.join("StoreContent/persistentStore")).unwrap();
        let offline = StorageRoots::new(env.roots.local.clone(), None);
        let record = DocumentRecord::new("abc", "n", Location::Local);

        let result = env
            .coordinator
            .migrate(&env.config, &offline, &record, Location::Remote)
            .await;
        assert!(matches!(result, Err(DocSetError::RemoteStorageUnavailable(_))));
        assert_eq!(
            std::fs::read(url.join("StoreContent/persistentStore")).unwrap(),
            before
        );
        assert!(leftovers(url.parent().unwrap()).is_empty());
    }

    #[tokio::test]
    async fn test_same_location_is_noop() {
        let env = env();
        // No storage at all: a no-op must not even look.
        let record = DocumentRecord::new("ghost", "n", Location::Local);
        let result = env
            .coordinator
            .migrate(&env.config, &env.roots, &record, Location::Local)
            .await
            .unwrap();
        assert_eq!(result, record);
    }

    #[tokio::test]
    async fn test_missing_source_is_not_found() {
        let env = env();
        let record = DocumentRecord::new("ghost", "n", Location::Local);
        let result = env
            .coordinator
            .migrate(&env.config, &env.roots, &record, Location::Remote)
            .await;
        assert!(matches!(result, Err(DocSetError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_existing_target_refused() {
        let env = env();
        let url = seed(&env, "abc", Location::Local);
        seed(&env, "abc", Location::Remote);
        let record = DocumentRecord::new("abc", "n", Location::Local);

        let result = env
            .coordinator
            .migrate(&env.config, &env.roots, &record, Location::Remote)
            .await;
        assert!(matches!(result, Err(DocSetError::MigrationFailed { .. })));
        assert!(url.is_dir());
    }

    #[tokio::test]
    async fn test_locked_document_refused() {
        let env = env();
        seed(&env, "abc", Location::Local);
        let _held = env.coordinator.locks.try_acquire("SET1.abc").unwrap().unwrap();
        let record = DocumentRecord::new("abc", "n", Location::Local);

        let result = env
            .coordinator
            .migrate(&env.config, &env.roots, &record, Location::Remote)
            .await;
        match result {
            Err(DocSetError::MigrationFailed { identifier, target, .. }) => {
                assert_eq!(identifier, "abc");
                assert_eq!(target, Location::Remote);
            }
            other => panic!("expected MigrationFailed, got {:?}", other),
        }
    }

    /// Delegates to `TokioFs` but every rename fails.
    struct RenameFailingFs(TokioFs);

    #[async_trait]
    impl StorageFs for RenameFailingFs {
        async fn list_dir(&self, dir: &Path) -> Result<Vec<FsEntry>> {
            self.0.list_dir(dir).await
        }
        async fn stat(&self, path: &Path) -> Result<Option<FsEntryKind>> {
            self.0.stat(path).await
        }
        async fn create_dir_all(&self, path: &Path) -> Result<()> {
            self.0.create_dir_all(path).await
        }
        async fn read(&self, path: &Path) -> Result<Vec<u8>> {
            self.0.read(path).await
        }
        async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
            self.0.write(path, data).await
        }
        async fn copy_recursive(&self, from: &Path, to: &Path) -> Result<()> {
            self.0.copy_recursive(from, to).await
        }
        async fn rename(&self, _from: &Path, to: &Path) -> Result<()> {
            Err(DocSetError::Io(format!("simulated rename failure onto {}", to.display())))
        }
        async fn remove_recursive(&self, path: &Path) -> Result<bool> {
            self.0.remove_recursive(path).await
        }
    }

    #[tokio::test]
    async fn test_rename_failure_cleans_up() {
        let env = env_with(Arc::new(RenameFailingFs(TokioFs::new())));
        let url = seed(&env, "abc", Location::Local);
        let fs = TokioFs::new();
        let before = tree_digest(&fs, &url).await.unwrap();
        let record = DocumentRecord::new("abc", "n", Location::Local);

        let result = env
            .coordinator
            .migrate(&env.config, &env.roots, &record, Location::Remote)
            .await;
        assert!(matches!(result, Err(DocSetError::MigrationFailed { .. })));

        // Source intact, logs intact, no temporary left at the target
        assert_eq!(tree_digest(&fs, &url).await.unwrap(), before);
        assert!(paths::transaction_log_path(&env.config, &env.roots, "abc", Location::Local)
            .unwrap()
            .exists());
        let target_dir = paths::documents_dir(&env.config, &env.roots, Location::Remote).unwrap();
        assert!(leftovers(&target_dir).is_empty());
        assert!(!target_dir.join("abc.doc").exists());

        // The lock was released with the failure
        assert!(env.coordinator.locks.try_acquire("SET1.abc").unwrap().is_some());
    }
}
