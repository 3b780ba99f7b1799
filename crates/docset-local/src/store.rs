use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use docset_core::{DocSetError, DocumentStore, FsEntryKind, Result, StorageFs, StoreHandle};
use tracing::{debug, instrument};

/// Folder inside a package handed to the persistence engine.
pub const STORE_CONTENT_DIR: &str = "StoreContent";

/// Document store where each document is a directory package:
/// ```text
/// {storage_url}/
///   DocumentMetadata.json     (manager manifest)
///   StoreContent/             (persistence engine files)
///     options.json            (store options, when given)
/// ```
///
/// The store never looks inside `StoreContent/` beyond creating it; it only
/// tracks which handles are open.
pub struct PackageStore {
    fs: Arc<dyn StorageFs>,
    /// Open handles: token -> storage URL
    open: DashMap<String, StoreHandle>,
}

impl std::fmt::Debug for PackageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageStore")
            .field("open", &self.open.len())
            .finish_non_exhaustive()
    }
}

impl PackageStore {
    pub fn new(fs: Arc<dyn StorageFs>) -> Self {
        Self {
            fs,
            open: DashMap::new(),
        }
    }

    /// Number of handles currently open.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Whether any open handle points at `url`.
    pub fn is_open(&self, url: &Path) -> bool {
        self.open.iter().any(|h| h.url == url)
    }
}

#[async_trait]
impl DocumentStore for PackageStore {
    fn store_name(&self) -> &'static str {
        "package"
    }

    #[instrument(skip(self, options), level = "debug")]
    async fn initialize_empty(&self, url: &Path, options: &serde_json::Value) -> Result<()> {
        if self.fs.exists(url).await? {
            return Err(DocSetError::InvalidArgument(format!(
                "Storage already exists at {}",
                url.display()
            )));
        }

        let content = url.join(STORE_CONTENT_DIR);
        self.fs.create_dir_all(&content).await?;
        if !options.is_null() {
            let json = serde_json::to_vec_pretty(options).map_err(|e| {
                DocSetError::Serialization(format!("Failed to serialize store options: {}", e))
            })?;
            self.fs.write(&content.join("options.json"), &json).await?;
        }

        debug!("Initialized empty package at {}", url.display());
        Ok(())
    }

    #[instrument(skip(self, _options), level = "debug")]
    async fn open(&self, url: &Path, _options: &serde_json::Value) -> Result<StoreHandle> {
        match self.fs.stat(url).await? {
            Some(FsEntryKind::Directory) => {}
            Some(FsEntryKind::File) => {
                return Err(DocSetError::InvalidArgument(format!(
                    "{} is not a document package",
                    url.display()
                )));
            }
            None => return Err(DocSetError::NotFound(url.display().to_string())),
        }

        let handle = StoreHandle {
            token: uuid::Uuid::new_v4().to_string(),
            url: url.to_path_buf(),
            opened_at: chrono::Utc::now(),
        };
        self.open.insert(handle.token.clone(), handle.clone());
        debug!("Opened {} ({} open)", url.display(), self.open.len());
        Ok(handle)
    }

    #[instrument(skip(self), level = "debug")]
    async fn close(&self, handle: StoreHandle) -> Result<()> {
        match self.open.remove(&handle.token) {
            Some(_) => {
                debug!("Closed {}", handle.url.display());
                Ok(())
            }
            None => Err(DocSetError::NotFound(format!(
                "No open handle {} for {}",
                handle.token,
                handle.url.display()
            ))),
        }
    }
}
