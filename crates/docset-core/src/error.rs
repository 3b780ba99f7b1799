use thiserror::Error;

use crate::model::Location;

/// Errors that can occur while managing a document set.
#[derive(Error, Debug)]
pub enum DocSetError {
    #[error("Remote storage unavailable: {0}")]
    RemoteStorageUnavailable(String),

    #[error("Identifier collision: {0}")]
    IdentifierCollision(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Migration of {identifier} to {target} failed: {reason}")]
    MigrationFailed {
        identifier: String,
        target: Location,
        reason: String,
    },

    #[error("Scan I/O error: {0}")]
    ScanIo(String),

    #[error("A document scan is in progress")]
    ScanInProgress,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl DocSetError {
    /// Build a `MigrationFailed` error.
    pub fn migration_failed(
        identifier: impl Into<String>,
        target: Location,
        reason: impl Into<String>,
    ) -> Self {
        Self::MigrationFailed {
            identifier: identifier.into(),
            target,
            reason: reason.into(),
        }
    }

    /// Whether this error means the storage in question does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T, E = DocSetError> = std::result::Result<T, E>;
