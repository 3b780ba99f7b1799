use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DocSetError, Result};

/// Identifier used when a configuration does not name its document set.
pub const DEFAULT_DOCUMENT_SET_IDENTIFIER: &str = "APMD_DATA";

/// Transaction log folder used when a configuration does not name one.
pub const DEFAULT_TRANSACTION_LOG_SUBFOLDER: &str = "TransactionLogs";

/// Process-wide description of a document set and its storage policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentSetConfiguration {
    /// Namespace separating this set's documents from others sharing a root.
    pub document_set_identifier: String,
    /// Optional folder under `{root}/{document_set_identifier}`.
    pub documents_subfolder: Option<String>,
    /// Folder under `{root}/{document_set_identifier}` holding transaction logs.
    pub transaction_log_subfolder: String,
    /// Suffix of document storage names, e.g. `.doc`.
    pub documents_extension: Option<String>,
    /// New and reconciled documents target remote storage when set.
    pub prefer_remote_storage: bool,
    /// Persistence-engine options, passed through to the document store.
    pub store_options: serde_json::Value,
}

impl Default for DocumentSetConfiguration {
    fn default() -> Self {
        Self {
            document_set_identifier: DEFAULT_DOCUMENT_SET_IDENTIFIER.to_string(),
            documents_subfolder: None,
            transaction_log_subfolder: DEFAULT_TRANSACTION_LOG_SUBFOLDER.to_string(),
            documents_extension: None,
            prefer_remote_storage: false,
            store_options: serde_json::Value::Null,
        }
    }
}

impl DocumentSetConfiguration {
    pub fn with_document_set_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.document_set_identifier = identifier.into();
        self
    }

    pub fn with_documents_subfolder(mut self, subfolder: impl Into<String>) -> Self {
        self.documents_subfolder = Some(subfolder.into());
        self
    }

    pub fn with_documents_extension(mut self, extension: impl Into<String>) -> Self {
        self.documents_extension = Some(extension.into());
        self
    }

    pub fn with_prefer_remote_storage(mut self, prefer_remote: bool) -> Self {
        self.prefer_remote_storage = prefer_remote;
        self
    }

    /// Load a configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DocSetError::Io(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            DocSetError::Serialization(format!(
                "Failed to parse config {}: {}",
                path.display(),
                e
            ))
        })?;
        config.normalized()
    }

    /// Validate every path segment and give the extension a leading dot.
    pub fn normalized(mut self) -> Result<Self> {
        check_segment("document_set_identifier", &self.document_set_identifier)?;
        check_segment("transaction_log_subfolder", &self.transaction_log_subfolder)?;

        self.documents_subfolder = match self.documents_subfolder.take() {
            Some(s) if s.is_empty() => None,
            Some(s) => {
                check_segment("documents_subfolder", &s)?;
                Some(s)
            }
            None => None,
        };

        self.documents_extension = match self.documents_extension.take() {
            Some(ext) => {
                let ext = ext.trim_start_matches('.');
                if ext.is_empty() {
                    None
                } else {
                    check_segment("documents_extension", ext)?;
                    Some(format!(".{}", ext))
                }
            }
            None => None,
        };

        Ok(self)
    }
}

fn check_segment(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(DocSetError::InvalidArgument(format!("{} must not be empty", field)));
    }
    if value == ".." || value == "." || value.contains('/') || value.contains('\\') {
        return Err(DocSetError::InvalidArgument(format!(
            "{} must be a single path segment, got '{}'",
            field, value
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DocumentSetConfiguration::default();
        assert_eq!(config.document_set_identifier, "APMD_DATA");
        assert_eq!(config.transaction_log_subfolder, "TransactionLogs");
        assert!(config.documents_subfolder.is_none());
        assert!(config.documents_extension.is_none());
        assert!(!config.prefer_remote_storage);
    }

    #[test]
    fn test_normalize_extension() {
        let config = DocumentSetConfiguration::default()
            .with_documents_extension("doc")
            .normalized()
            .unwrap();
        assert_eq!(config.documents_extension.as_deref(), Some(".doc"));

        let config = DocumentSetConfiguration::default()
            .with_documents_extension(".doc")
            .normalized()
            .unwrap();
        assert_eq!(config.documents_extension.as_deref(), Some(".doc"));

        let config = DocumentSetConfiguration::default()
            .with_documents_extension(".")
            .normalized()
            .unwrap();
        assert!(config.documents_extension.is_none());
    }

    #[test]
    fn test_rejects_path_traversal() {
        let result = DocumentSetConfiguration::default()
            .with_documents_subfolder("../escape")
            .normalized();
        assert!(matches!(result, Err(DocSetError::InvalidArgument(_))));

        let result = DocumentSetConfiguration::default()
            .with_document_set_identifier("")
            .normalized();
        assert!(matches!(result, Err(DocSetError::InvalidArgument(_))));
    }

    #[test]
    fn test_from_json_file_partial() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("docset.json");
        std::fs::write(
            &path,
            r#"{"document_set_identifier": "SET1", "documents_extension": "doc",
                "store_options": {"journal_mode": "wal"}}"#,
        )
        .unwrap();

        let config = DocumentSetConfiguration::from_json_file(&path).unwrap();
        assert_eq!(config.document_set_identifier, "SET1");
        assert_eq!(config.documents_extension.as_deref(), Some(".doc"));
        assert_eq!(config.transaction_log_subfolder, "TransactionLogs");
        assert_eq!(config.store_options["journal_mode"], "wal");
    }
}
