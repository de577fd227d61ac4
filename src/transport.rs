use crate::types::{NodeId, SnapshotEntry, StorageEntry};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Liveness probe sent by the heartbeat loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {
    pub sender_id: NodeId,
    pub sender_address: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatAck {
    pub node_id: NodeId,
    pub address: String,
    pub epoch: u64,
}

/// Kind of mutation carried by a replicate call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// One mutation fanned out by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateRequest {
    pub sender_id: NodeId,
    pub key: String,
    /// Empty for deletes
    pub value: Vec<u8>,
    /// For deletes, the deletion revision (removed version + 1)
    pub version: u64,
    pub timestamp: i64,
    pub origin: NodeId,
    pub operation: Operation,
}

impl ReplicateRequest {
    pub fn from_entry(
        sender_id: NodeId,
        key: String,
        entry: StorageEntry,
        operation: Operation,
    ) -> Self {
        Self {
            sender_id,
            key,
            value: entry.value,
            version: entry.version,
            timestamp: entry.timestamp,
            origin: entry.origin,
            operation,
        }
    }

    pub fn entry(&self) -> StorageEntry {
        StorageEntry::new(
            self.value.clone(),
            self.version,
            self.timestamp,
            self.origin.clone(),
        )
    }
}

/// Replicate calls are acknowledged whether or not they changed the peer:
/// an ignored stale revision is still a processed one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicateAck {
    pub node_id: NodeId,
    pub applied: bool,
}

/// Full table exchange. Requests carry the initiator's snapshot, responses
/// carry the responder's.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub sender_id: NodeId,
    pub sender_address: String,
    pub entries: Vec<SnapshotEntry>,
}

/// Network seam. The core never opens sockets itself, the host program
/// implements this over whatever wire it uses.
pub trait PeerTransport: Send + Sync + 'static {
    fn heartbeat(
        &self,
        peer: &str,
        msg: Heartbeat,
    ) -> impl Future<Output = Result<HeartbeatAck>> + Send;

    fn replicate(
        &self,
        peer: &str,
        msg: ReplicateRequest,
    ) -> impl Future<Output = Result<ReplicateAck>> + Send;

    fn merge_snapshot(
        &self,
        peer: &str,
        msg: SnapshotMessage,
    ) -> impl Future<Output = Result<SnapshotMessage>> + Send;
}
