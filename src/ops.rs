use crate::types::StorageEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Atomic table operations - lowest level instructions that mutate TableState
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StateOp {
    /// Set a key to an entry (create, update, merge)
    Set { key: String, entry: StorageEntry },

    /// Remove a key (local or replicated delete)
    Remove(String),

    /// Raise the revision counter to at least the given value
    RaiseRevision(u64),

    /// Bump the revision counter by one
    IncrementRevision,
}

/// Table state: the minimal state that defines a replica
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TableState {
    data: HashMap<String, StorageEntry>,

    /// Node-local monotonic counter, bumped on every local mutation
    revision: u64,
}

impl TableState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_noop(&self, op: &StateOp) -> bool {
        match op {
            StateOp::Set { key, entry } => self.data.get(key) == Some(entry),
            StateOp::Remove(key) => !self.data.contains_key(key),
            StateOp::RaiseRevision(revision) => self.revision >= *revision,
            StateOp::IncrementRevision => false,
        }
    }

    /// Execute a table operation - the only way to mutate TableState
    pub fn execute(&mut self, op: StateOp) {
        match op {
            StateOp::Set { key, entry } => {
                self.data.insert(key, entry);
            }
            StateOp::Remove(key) => {
                self.data.remove(&key);
            }
            StateOp::RaiseRevision(revision) => {
                self.revision = self.revision.max(revision);
            }
            StateOp::IncrementRevision => {
                self.revision += 1;
            }
        }
    }

    pub fn data(&self) -> &HashMap<String, StorageEntry> {
        &self.data
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}
