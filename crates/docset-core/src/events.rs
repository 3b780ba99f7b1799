use serde::{Deserialize, Serialize};

use crate::model::{DocumentRecord, Location};

/// Notifications emitted by a document manager, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DocumentEvent {
    ScanStarted,
    ScanFinished,
    ScanCancelled,
    /// A document appeared or its metadata changed.
    ///
    /// `previous` is the location the registry held before this event, or
    /// `None` when the identifier was not registered at all.
    DocumentFound {
        record: DocumentRecord,
        previous: Option<Location>,
    },
    /// A document was deleted, either explicitly or externally.
    DocumentDeleted {
        identifier: String,
        location: Location,
    },
}

impl DocumentEvent {
    /// The document this event concerns, if any.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            DocumentEvent::DocumentFound { record, .. } => Some(&record.identifier),
            DocumentEvent::DocumentDeleted { identifier, .. } => Some(identifier),
            _ => None,
        }
    }

    /// Whether this event ends a scan.
    pub fn is_scan_terminal(&self) -> bool {
        matches!(self, DocumentEvent::ScanFinished | DocumentEvent::ScanCancelled)
    }
}

/// Scanner state machine: `Idle -> Scanning -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Idle,
    Scanning,
}

/// How a scan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Finished,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_identifier() {
        let found = DocumentEvent::DocumentFound {
            record: DocumentRecord::new("abc", "abc", Location::Local),
            previous: None,
        };
        assert_eq!(found.identifier(), Some("abc"));
        assert_eq!(DocumentEvent::ScanStarted.identifier(), None);
        assert!(DocumentEvent::ScanCancelled.is_scan_terminal());
        assert!(!found.is_scan_terminal());
    }

    #[test]
    fn test_event_json_shape() {
        let deleted = DocumentEvent::DocumentDeleted {
            identifier: "x".to_string(),
            location: Location::Remote,
        };
        let json = serde_json::to_value(&deleted).unwrap();
        assert_eq!(json["event"], "document_deleted");
        assert_eq!(json["identifier"], "x");
        assert_eq!(json["location"], "remote");
    }
}
