use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DocSetError;
use crate::remote::RemoteAvailability;

/// Where a document's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// The process-private, non-synchronized sandbox.
    Local,
    /// The synchronized storage root. May be unreachable.
    Remote,
}

impl Location {
    /// The location storage policy targets for a `prefer_remote_storage` flag.
    pub fn preferred(prefer_remote: bool) -> Self {
        if prefer_remote {
            Self::Remote
        } else {
            Self::Local
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local => write!(f, "local"),
            Location::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for Location {
    type Err = DocSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "local" => Ok(Location::Local),
            "remote" => Ok(Location::Remote),
            other => Err(DocSetError::InvalidArgument(format!(
                "unknown location '{}', expected 'local' or 'remote'",
                other
            ))),
        }
    }
}

/// A known document.
///
/// The storage URL is deliberately absent: it is always recomputed from the
/// configuration, the storage roots, the identifier and the location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Unique within a document set, immutable once assigned.
    pub identifier: String,
    /// User-visible name. Not unique.
    pub display_name: String,
    /// Current storage location.
    pub location: Location,
}

impl DocumentRecord {
    pub fn new(
        identifier: impl Into<String>,
        display_name: impl Into<String>,
        location: Location,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            display_name: display_name.into(),
            location,
        }
    }

    /// Copy of this record at another location.
    pub fn relocated(&self, location: Location) -> Self {
        Self {
            location,
            ..self.clone()
        }
    }
}

/// Snapshot of the two storage roots at one point in time.
///
/// `remote` is `None` when remote storage was unreachable when the snapshot
/// was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRoots {
    pub local: PathBuf,
    pub remote: Option<PathBuf>,
}

impl StorageRoots {
    pub fn new(local: impl Into<PathBuf>, remote: Option<PathBuf>) -> Self {
        Self {
            local: local.into(),
            remote,
        }
    }

    /// Take a snapshot, consulting the oracle once.
    pub fn snapshot(local: impl Into<PathBuf>, remote: &dyn RemoteAvailability) -> Self {
        let remote = remote
            .is_reachable()
            .then(|| remote.remote_root().to_path_buf());
        Self::new(local, remote)
    }

    pub fn remote_reachable(&self) -> bool {
        self.remote.is_some()
    }
}
