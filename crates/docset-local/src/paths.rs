//! Canonical storage paths for a document set.
//!
//! Every function here is pure: no I/O, no state. Layout:
//! ```text
//! {root}/
//!   {document_set_identifier}/
//!     {documents_subfolder}/          (optional)
//!       {identifier}{extension}       (document storage)
//!     {transaction_log_subfolder}/
//!       {identifier}/                 (transaction logs)
//! ```

use std::path::{Path, PathBuf};

use docset_core::{DocSetError, DocumentSetConfiguration, Location, Result, StorageRoots};

/// The root for a location. Remote fails when unreachable; there is no
/// fallback to Local.
pub fn root(roots: &StorageRoots, location: Location) -> Result<&Path> {
    match location {
        Location::Local => Ok(&roots.local),
        Location::Remote => roots.remote.as_deref().ok_or_else(|| {
            DocSetError::RemoteStorageUnavailable(
                "remote storage root is not reachable".to_string(),
            )
        }),
    }
}

/// `{root}/{document_set_identifier}`
pub fn document_set_dir(
    config: &DocumentSetConfiguration,
    roots: &StorageRoots,
    location: Location,
) -> Result<PathBuf> {
    Ok(root(roots, location)?.join(&config.document_set_identifier))
}

/// Directory holding the document storage items for a location.
pub fn documents_dir(
    config: &DocumentSetConfiguration,
    roots: &StorageRoots,
    location: Location,
) -> Result<PathBuf> {
    let dir = document_set_dir(config, roots, location)?;
    Ok(match &config.documents_subfolder {
        Some(subfolder) => dir.join(subfolder),
        None => dir,
    })
}

/// Storage URL of a document.
pub fn resolve(
    config: &DocumentSetConfiguration,
    roots: &StorageRoots,
    identifier: &str,
    location: Location,
) -> Result<PathBuf> {
    Ok(documents_dir(config, roots, location)?.join(file_name(config, identifier)))
}

/// Directory holding every document's transaction logs for a location.
pub fn transaction_logs_dir(
    config: &DocumentSetConfiguration,
    roots: &StorageRoots,
    location: Location,
) -> Result<PathBuf> {
    Ok(document_set_dir(config, roots, location)?.join(&config.transaction_log_subfolder))
}

/// Transaction logs of one document.
pub fn transaction_log_path(
    config: &DocumentSetConfiguration,
    roots: &StorageRoots,
    identifier: &str,
    location: Location,
) -> Result<PathBuf> {
    Ok(transaction_logs_dir(config, roots, location)?.join(identifier))
}

/// Storage item name for an identifier.
pub fn file_name(config: &DocumentSetConfiguration, identifier: &str) -> String {
    match &config.documents_extension {
        Some(ext) => format!("{}{}", identifier, ext),
        None => identifier.to_string(),
    }
}

/// Inverse of [`file_name`]: the identifier a storage item name stands for.
///
/// Hidden names never match; they are reserved for in-flight migrations
/// and temporary files.
pub fn identifier_from_file_name(config: &DocumentSetConfiguration, name: &str) -> Option<String> {
    if name.starts_with('.') || name.ends_with(".tmp") {
        return None;
    }
    let stem = match &config.documents_extension {
        Some(ext) => name.strip_suffix(ext.as_str())?,
        None => name,
    };
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Whether a documents directory entry with this name may be a document.
///
/// Without a documents subfolder the transaction log folder shares the
/// documents directory and must not be mistaken for a document.
pub fn is_reserved_name(config: &DocumentSetConfiguration, name: &str) -> bool {
    config.documents_subfolder.is_none() && name == config.transaction_log_subfolder
}
