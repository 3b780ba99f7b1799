use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docset_core::{DocumentSetConfiguration, Location, Result};

/// Configuration for the docset-local command line tool.
#[derive(Parser, Debug, Clone)]
#[command(name = "docset-local")]
#[command(about = "Manage a document set stored in a local sandbox and a synchronized remote folder")]
pub struct Config {
    /// Local sandbox root
    #[arg(long, env = "DOCSET_LOCAL_DIR")]
    pub local_dir: Option<PathBuf>,

    /// Synchronized remote root. Treated as unreachable when absent or
    /// missing on disk.
    #[arg(long, env = "DOCSET_REMOTE_DIR")]
    pub remote_dir: Option<PathBuf>,

    /// JSON document set configuration
    #[arg(long, env = "DOCSET_CONFIG")]
    pub config: Option<PathBuf>,

    /// Document set identifier (overrides the config file)
    #[arg(long)]
    pub set_id: Option<String>,

    /// Documents subfolder (overrides the config file)
    #[arg(long)]
    pub subfolder: Option<String>,

    /// Documents extension, e.g. ".doc" (overrides the config file)
    #[arg(long)]
    pub extension: Option<String>,

    /// Create and reconcile documents in remote storage
    #[arg(long)]
    pub prefer_remote: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Scan, then list every document
    List,
    /// Create an empty document and print its identifier
    Create { name: String },
    /// Delete a document's storage and transaction logs
    Delete { identifier: String },
    /// Change a document's display name
    Rename { identifier: String, name: String },
    /// Move a document to local or remote storage
    Migrate {
        identifier: String,
        #[arg(value_enum)]
        target: TargetLocation,
    },
    /// Run one scan, printing events as JSON lines
    Scan,
    /// Rescan whenever the documents directories change, until Ctrl+C
    Watch {
        /// Quiet period before a rescan, in milliseconds
        #[arg(long, default_value = "500")]
        debounce_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TargetLocation {
    Local,
    Remote,
}

impl From<TargetLocation> for Location {
    fn from(target: TargetLocation) -> Self {
        match target {
            TargetLocation::Local => Location::Local,
            TargetLocation::Remote => Location::Remote,
        }
    }
}

impl Config {
    /// Get the effective local sandbox root.
    pub fn effective_local_dir(&self) -> PathBuf {
        self.local_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("docset")
        })
    }

    /// The config file (or defaults) with command line overrides applied.
    pub fn document_set(&self) -> Result<DocumentSetConfiguration> {
        let mut config = match &self.config {
            Some(path) => DocumentSetConfiguration::from_json_file(path)?,
            None => DocumentSetConfiguration::default(),
        };
        if let Some(set_id) = &self.set_id {
            config = config.with_document_set_identifier(set_id);
        }
        if let Some(subfolder) = &self.subfolder {
            config = config.with_documents_subfolder(subfolder);
        }
        if let Some(extension) = &self.extension {
            config = config.with_documents_extension(extension);
        }
        if self.prefer_remote {
            config = config.with_prefer_remote_storage(true);
        }
        config.normalized()
    }
}
