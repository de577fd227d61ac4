/// Errors surfaced by key-value operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvError {
    #[error("key already exists: {0}")]
    KeyExists(String),
    #[error("key not found: {0}")]
    KeyNotFound(String),
    #[error("quorum not met: need {required} acks, got {acked}")]
    QuorumNotMet { required: usize, acked: usize },
    /// Absorbed by the coordinator and the failure detector, only logged
    #[error("peer {address} unreachable: {reason}")]
    PeerUnreachable { address: String, reason: String },
    #[error("invalid consistency level: {0}")]
    InvalidConsistencyLevel(String),
}
