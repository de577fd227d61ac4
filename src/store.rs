use crate::error::KvError;
use crate::ops::{StateOp, TableState};
use crate::types::{compare_entries, now_micros, NodeId, SnapshotEntry, StorageEntry};
use std::cmp::Ordering;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

/// Per-node storage table.
///
/// - Pure in-memory map of key to versioned entry
/// - Version/timestamp precedence for conflict resolution
/// - Single RwLock covering every read-modify-write sequence
/// - No network awareness: fan-out is the coordinator's job
pub struct StorageTable {
    node_id: NodeId,
    state: RwLock<TableState>,
}

impl StorageTable {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            state: RwLock::new(TableState::new()),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableState> {
        // Every mutation is a single insert or remove, a poisoned map is still consistent
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read_state(&self) -> RwLockReadGuard<'_, TableState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Execute state operations under an already held write guard.
    /// This is the ONLY mutation path of the table.
    fn execute_ops(state: &mut TableState, ops: Vec<StateOp>) {
        for op in ops {
            if state.is_noop(&op) {
                trace!("Skipping noop op: {op:?}");
                continue;
            }
            state.execute(op);
        }
    }

    fn local_entry(&self, value: Vec<u8>, version: u64) -> StorageEntry {
        StorageEntry::new(value, version, now_micros(), self.node_id.clone())
    }

    /// Insert a new key at the next table revision. The revision is never
    /// below any version this table has held, so a re-created key outranks
    /// copies peers kept from before its delete.
    pub fn create(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<StorageEntry, KvError> {
        let mut state = self.write();
        if state.data().contains_key(key) {
            return Err(KvError::KeyExists(key.to_string()));
        }
        let entry = self.local_entry(value.into(), state.revision() + 1);
        Self::execute_ops(
            &mut state,
            vec![
                StateOp::Set {
                    key: key.to_string(),
                    entry: entry.clone(),
                },
                StateOp::IncrementRevision,
            ],
        );
        Ok(entry)
    }

    pub fn read(&self, key: &str) -> Option<Vec<u8>> {
        self.read_state().data().get(key).map(|e| e.value.clone())
    }

    /// Version-aware read
    pub fn read_versioned(&self, key: &str) -> Option<StorageEntry> {
        self.read_state().data().get(key).cloned()
    }

    pub fn update(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<StorageEntry, KvError> {
        let mut state = self.write();
        let Some(existing) = state.data().get(key) else {
            return Err(KvError::KeyNotFound(key.to_string()));
        };
        let entry = self.local_entry(value.into(), existing.version + 1);
        Self::execute_ops(
            &mut state,
            vec![
                StateOp::Set {
                    key: key.to_string(),
                    entry: entry.clone(),
                },
                StateOp::IncrementRevision,
            ],
        );
        Ok(entry)
    }

    /// Remove a key and return the removed entry. No tombstone is kept.
    pub fn delete(&self, key: &str) -> Result<StorageEntry, KvError> {
        let mut state = self.write();
        let Some(previous) = state.data().get(key).cloned() else {
            return Err(KvError::KeyNotFound(key.to_string()));
        };
        Self::execute_ops(
            &mut state,
            vec![StateOp::Remove(key.to_string()), StateOp::IncrementRevision],
        );
        Ok(previous)
    }

    pub fn get_version(&self, key: &str) -> Option<u64> {
        self.read_state().data().get(key).map(|e| e.version)
    }

    /// Export all entries for anti-entropy. Order is unspecified.
    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        self.read_state()
            .data()
            .iter()
            .map(|(k, v)| SnapshotEntry::from_entry(k.clone(), v.clone()))
            .collect()
    }

    /// Merge remote entries by (version, timestamp) precedence.
    ///
    /// An incoming entry replaces the local one only if it is strictly newer.
    /// Equal pairs keep the local entry, so merging the same snapshot twice is
    /// a no-op. Keys missing from `entries` are left untouched.
    ///
    /// Returns the number of keys that changed.
    pub fn merge(&self, entries: impl IntoIterator<Item = SnapshotEntry>) -> usize {
        let mut state = self.write();
        let mut changed = 0;
        let mut max_version = 0;
        for incoming in entries {
            let (key, entry) = incoming.into_parts();
            let should_replace = match state.data().get(&key) {
                Some(local) => compare_entries(local, &entry) == Ordering::Less,
                None => true,
            };
            if !should_replace {
                trace!(key, version = entry.version, "Keeping local entry");
                continue;
            }
            debug!(key, version = entry.version, origin = %entry.origin, "Merging entry");
            max_version = max_version.max(entry.version);
            changed += 1;
            // Later duplicates in the same batch must compare against this one
            Self::execute_ops(&mut state, vec![StateOp::Set { key, entry }]);
        }
        Self::execute_ops(&mut state, vec![StateOp::RaiseRevision(max_version)]);
        changed
    }

    /// Single-key merge, used for replicated creates and updates
    pub fn merge_entry(&self, key: String, entry: StorageEntry) -> bool {
        self.merge([SnapshotEntry::from_entry(key, entry)]) > 0
    }

    /// Apply a replicated delete.
    ///
    /// `version` is the deletion revision (removed version + 1). The key is
    /// removed only if the local copy is older than that revision, so a newer
    /// concurrent write survives a stale delete.
    pub fn apply_delete(&self, key: &str, version: u64) -> bool {
        let mut state = self.write();
        match state.data().get(key) {
            Some(local) if local.version < version => {
                debug!(key, version, "Applying replicated delete");
                Self::execute_ops(
                    &mut state,
                    vec![
                        StateOp::Remove(key.to_string()),
                        StateOp::RaiseRevision(version),
                    ],
                );
                true
            }
            Some(local) => {
                debug!(
                    key,
                    version,
                    local_version = local.version,
                    "Ignoring stale replicated delete"
                );
                false
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.read_state().data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u64 {
        self.read_state().revision()
    }
}
