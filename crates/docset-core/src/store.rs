use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Handle to an open document store.
///
/// The token identifies this particular open; it is meaningless outside
/// the store that issued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreHandle {
    pub token: String,
    pub url: PathBuf,
    pub opened_at: chrono::DateTime<chrono::Utc>,
}

/// The opaque store holding a document's contents.
///
/// The manager opens, closes and initializes stores at resolved storage
/// URLs but never interprets what they contain.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the store identifier (e.g., "package").
    fn store_name(&self) -> &'static str;

    /// Create empty storage at `url`. `options` is the configuration's
    /// opaque `store_options` payload.
    async fn initialize_empty(&self, url: &Path, options: &serde_json::Value) -> Result<()>;

    /// Open the storage at `url`.
    async fn open(&self, url: &Path, options: &serde_json::Value) -> Result<StoreHandle>;

    /// Close a handle returned by `open`.
    async fn close(&self, handle: StoreHandle) -> Result<()>;
}
