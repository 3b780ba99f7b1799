use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use docset_core::DocumentRecord;

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, DocumentRecord>,
    /// Identifiers removed since the last [`DocumentRegistry::mark`] and not
    /// registered again since.
    removed: HashSet<String>,
}

/// In-memory index of known documents, keyed by identifier.
///
/// The registry is a cache of what is on disk. Its single mutex is the one
/// mutual-exclusion point for registry state: multi-step updates take a
/// [`RegistryGuard`] through [`DocumentRegistry::write`] and publish their
/// events before releasing it, so event order always equals mutation order.
/// Mutations never publish anything themselves.
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    state: Mutex<State>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the registry for a multi-step update. Never hold the guard
    /// across an `.await`.
    pub fn write(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    /// Start tracking removals afresh. A scan marks when it begins so it can
    /// tell items deleted while it was running from new ones.
    pub fn mark(&self) {
        self.write().state.removed.clear();
    }

    /// Insert or replace a record. Returns the previous record.
    pub fn upsert(&self, record: DocumentRecord) -> Option<DocumentRecord> {
        self.write().upsert(record)
    }

    pub fn remove(&self, identifier: &str) -> Option<DocumentRecord> {
        self.write().remove(identifier)
    }

    pub fn get(&self, identifier: &str) -> Option<DocumentRecord> {
        self.write().get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.write().contains(identifier)
    }

    /// Snapshot of every registered identifier.
    pub fn all_identifiers(&self) -> BTreeSet<String> {
        self.write().all_identifiers()
    }

    /// Snapshot of every record, sorted by identifier.
    pub fn records(&self) -> Vec<DocumentRecord> {
        let guard = self.write();
        let mut records: Vec<_> = guard.state.records.values().cloned().collect();
        records.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        records
    }

    pub fn len(&self) -> usize {
        self.write().state.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive access to the registry for the guard's lifetime.
pub struct RegistryGuard<'a> {
    state: MutexGuard<'a, State>,
}

impl RegistryGuard<'_> {
    pub fn upsert(&mut self, record: DocumentRecord) -> Option<DocumentRecord> {
        self.state.removed.remove(&record.identifier);
        self.state.records.insert(record.identifier.clone(), record)
    }

    pub fn remove(&mut self, identifier: &str) -> Option<DocumentRecord> {
        let removed = self.state.records.remove(identifier);
        if removed.is_some() {
            self.state.removed.insert(identifier.to_string());
        }
        removed
    }

    pub fn get(&self, identifier: &str) -> Option<DocumentRecord> {
        self.state.records.get(identifier).cloned()
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.state.records.contains_key(identifier)
    }

    pub fn all_identifiers(&self) -> BTreeSet<String> {
        self.state.records.keys().cloned().collect()
    }

    /// Whether `identifier` was removed since the last mark and has not been
    /// registered again.
    pub fn removed_since_mark(&self, identifier: &str) -> bool {
        self.state.removed.contains(identifier)
    }
}
