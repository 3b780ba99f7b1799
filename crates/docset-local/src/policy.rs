use std::path::{Path, PathBuf};

use docset_core::{DocSetError, Location, Result, StorageFs};
use serde::{Deserialize, Serialize};

/// Hidden folder under the local root holding per-set state files.
pub const STATE_DIR: &str = ".docset-state";

/// The storage policy a finished scan last applied to a document set.
///
/// Survives restarts so a process started with a different policy than the
/// previous one knows its documents may sit at the wrong location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyState {
    pub prefer_remote_storage: bool,
    pub applied_at: chrono::DateTime<chrono::Utc>,
}

impl PolicyState {
    pub fn new(prefer_remote_storage: bool) -> Self {
        Self {
            prefer_remote_storage,
            applied_at: chrono::Utc::now(),
        }
    }

    /// `{local_root}/.docset-state/{set}.json`
    pub fn path(local_root: &Path, set_identifier: &str) -> PathBuf {
        local_root
            .join(STATE_DIR)
            .join(format!("{}.json", set_identifier))
    }

    /// Read the state of a set. `Ok(None)` when no policy was ever applied.
    pub fn load(local_root: &Path, set_identifier: &str) -> Result<Option<Self>> {
        let path = Self::path(local_root, set_identifier);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(DocSetError::Io(format!(
                    "Failed to read policy state {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let state = serde_json::from_str(&json).map_err(|e| {
            DocSetError::Serialization(format!(
                "Failed to parse policy state {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(state))
    }

    /// Location documents of the set were last reconciled to. A set that
    /// never had a policy applied keeps its documents Local.
    pub fn applied_location(local_root: &Path, set_identifier: &str) -> Result<Location> {
        let prefer_remote = Self::load(local_root, set_identifier)?
            .map(|state| state.prefer_remote_storage)
            .unwrap_or(false);
        Ok(Location::preferred(prefer_remote))
    }

    pub async fn save(
        &self,
        fs: &dyn StorageFs,
        local_root: &Path,
        set_identifier: &str,
    ) -> Result<()> {
        let path = Self::path(local_root, set_identifier);
        if let Some(dir) = path.parent() {
            fs.create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|e| {
            DocSetError::Serialization(format!("Failed to serialize policy state: {}", e))
        })?;
        fs.write(&path, &json).await
    }
}
