use std::{cmp::Ordering, collections::BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Opaque, stable node identifier. Distinct from the network address.
pub type NodeId = String;

/// Wall-clock milliseconds, used by the failure detector
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Wall-clock microseconds. Entry timestamps use this, they only break version ties.
pub fn now_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// One revision of a key held in a node's storage table
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageEntry {
    pub value: Vec<u8>,
    pub version: u64,
    /// Microseconds since the epoch
    pub timestamp: i64,
    pub origin: NodeId,
}

impl std::fmt::Debug for StorageEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEntry")
            .field("value_len", &self.value.len())
            .field("version", &self.version)
            .field("timestamp", &self.timestamp)
            .field("origin", &self.origin)
            .finish()
    }
}

impl StorageEntry {
    pub fn new(value: Vec<u8>, version: u64, timestamp: i64, origin: NodeId) -> Self {
        Self {
            value,
            version,
            timestamp,
            origin,
        }
    }

    /// Precedence used by merge: version first, then timestamp.
    /// The origin node is not part of the order.
    pub fn precedence(&self) -> (u64, i64) {
        (self.version, self.timestamp)
    }
}

/// Compare two revisions of the same key by (version, timestamp)
pub fn compare_entries(entry1: &StorageEntry, entry2: &StorageEntry) -> Ordering {
    entry1.precedence().cmp(&entry2.precedence())
}

/// A key together with its entry, as exported for anti-entropy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: Vec<u8>,
    pub version: u64,
    pub timestamp: i64,
    pub origin: NodeId,
}

impl SnapshotEntry {
    pub fn from_entry(key: String, entry: StorageEntry) -> Self {
        Self {
            key,
            value: entry.value,
            version: entry.version,
            timestamp: entry.timestamp,
            origin: entry.origin,
        }
    }

    pub fn into_parts(self) -> (String, StorageEntry) {
        (
            self.key,
            StorageEntry::new(self.value, self.version, self.timestamp, self.origin),
        )
    }
}

/// Health of a peer as seen by the local failure detector
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    Active,
    Suspect,
    Inactive,
}

impl PeerState {
    /// Next state after a missed heartbeat interval
    pub fn demoted(self) -> Self {
        match self {
            PeerState::Active => PeerState::Suspect,
            PeerState::Suspect | PeerState::Inactive => PeerState::Inactive,
        }
    }
}

/// Everything this node knows about one peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerMetadata {
    /// Learned on first successful contact
    pub node_id: Option<NodeId>,
    pub address: String,
    pub state: PeerState,
    /// Last successful contact, in millis
    pub last_heartbeat: i64,
    /// When `state` last changed, in millis
    pub state_since: i64,
    /// Peer-reported epoch, only ever raised
    pub version: u64,
}

impl PeerMetadata {
    pub fn new(address: String, now: i64) -> Self {
        Self {
            node_id: None,
            address,
            state: PeerState::Active,
            last_heartbeat: now,
            state_since: now,
            version: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == PeerState::Active
    }
}

/// Outcome of one replicated write
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WriteResult {
    pub key: String,
    /// Version produced by the write (for deletes, the deletion revision)
    pub version: u64,
    pub required: usize,
    /// Distinct nodes that acknowledged, local node included
    pub acks: BTreeSet<NodeId>,
    pub success: bool,
}

impl WriteResult {
    pub fn new(key: String, version: u64, required: usize) -> Self {
        Self {
            key,
            version,
            required,
            acks: BTreeSet::new(),
            success: false,
        }
    }

    /// Returns true if the node had not acknowledged before
    pub fn add_ack(&mut self, node_id: NodeId) -> bool {
        self.acks.insert(node_id)
    }

    pub fn ack_count(&self) -> usize {
        self.acks.len()
    }

    pub fn quorum_met(&self) -> bool {
        self.ack_count() >= self.required
    }
}

/// A single replica's answer to a read
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadResult {
    pub value: Vec<u8>,
    pub version: u64,
    pub timestamp: i64,
    pub node_id: NodeId,
}
