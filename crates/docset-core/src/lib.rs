//! Core traits and types for docset document managers.
//!
//! This crate defines the abstractions shared between the manager and its
//! external collaborators:
//! - `DocumentSetConfiguration`, `DocumentRecord`, `Location`: the data model
//! - `DocumentEvent`: the notification protocol emitted by managers
//! - `RemoteAvailability`: the "is remote storage reachable" oracle
//! - `DocumentStore`: the opaque document store opened at a storage URL
//! - `StorageFs`: the filesystem primitives migrations and scans are built on

mod config;
mod error;
mod events;
mod fs;
mod model;
mod remote;
mod store;

pub use config::{
    DocumentSetConfiguration, DEFAULT_DOCUMENT_SET_IDENTIFIER,
    DEFAULT_TRANSACTION_LOG_SUBFOLDER,
};
pub use error::{DocSetError, Result};
pub use events::{DocumentEvent, ScanOutcome, ScanState};
pub use fs::{FsEntry, FsEntryKind, StorageFs};
pub use model::{DocumentRecord, Location, StorageRoots};
pub use remote::RemoteAvailability;
pub use store::{DocumentStore, StoreHandle};
