use std::path::{Path, PathBuf};

use docset_core::{DocSetError, Result, StorageFs};
use serde::{Deserialize, Serialize};

/// File inside a document package holding its manager-owned metadata.
pub const MANIFEST_FILE: &str = "DocumentMetadata.json";

/// Metadata the manager keeps next to a document's store contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentManifest {
    pub identifier: String,
    pub display_name: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl DocumentManifest {
    pub fn new(identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            created_at: chrono::Utc::now(),
        }
    }

    pub fn path(storage_url: &Path) -> PathBuf {
        storage_url.join(MANIFEST_FILE)
    }

    /// Read the manifest of the package at `storage_url`.
    ///
    /// `Ok(None)` when the package has no manifest (e.g. storage created by
    /// another tool).
    pub async fn load(fs: &dyn StorageFs, storage_url: &Path) -> Result<Option<Self>> {
        let data = match fs.read(&Self::path(storage_url)).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let manifest = serde_json::from_slice(&data).map_err(|e| {
            DocSetError::Serialization(format!(
                "Failed to parse manifest in {}: {}",
                storage_url.display(),
                e
            ))
        })?;
        Ok(Some(manifest))
    }

    pub async fn save(&self, fs: &dyn StorageFs, storage_url: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| {
            DocSetError::Serialization(format!("Failed to serialize manifest: {}", e))
        })?;
        fs.write(&Self::path(storage_url), &json).await
    }
}
