//! Filesystem document location & migration manager.
//!
//! Documents live in a Local sandbox root or in a synchronized Remote root.
//! [`DocumentManager`] keeps a registry of where each one is, creates and
//! deletes them, migrates storage between roots and runs cancellable scans,
//! reporting everything through an ordered [`DocumentEvent`] stream.
//!
//! [`DocumentEvent`]: docset_core::DocumentEvent

pub mod bus;
pub mod config;
pub mod fs;
pub mod lock;
pub mod manager;
pub mod manifest;
pub mod migration;
pub mod paths;
pub mod policy;
pub mod registry;
pub mod remote;
pub mod scanner;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;
pub mod watch;

pub use bus::{DocumentSubscriber, NotificationBus, SubscriptionId};
pub use fs::TokioFs;
pub use lock::{FileLock, LockGuard};
pub use manager::{DocumentManager, DocumentManagerBuilder, MAX_IDENTIFIER_ATTEMPTS};
pub use manifest::DocumentManifest;
pub use migration::MigrationCoordinator;
pub use policy::PolicyState;
pub use registry::DocumentRegistry;
pub use remote::DirectoryRemote;
pub use scanner::{DocumentScanner, ScanHandle};
pub use store::PackageStore;
pub use watch::RootWatcher;
