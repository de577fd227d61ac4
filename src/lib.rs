//! quorumkv - An embeddable, replicated, eventually consistent key-value store
//!
//! Every node holds a full replica of a single map from string keys to opaque
//! values. Clients talk to any node; the node applies the write locally, fans
//! it out to its peers and reports success once enough of them acknowledged.
//!
//! # Key Features
//!
//! - **Peer-to-peer**: no leader, every node serves reads and writes
//! - **Tunable consistency**: `ONE`, `QUORUM` or `ALL` acknowledgements per write
//! - **Version-based conflict resolution**: higher version wins, timestamps break ties
//! - **Heartbeat failure detector**: peers go Active → Suspect → Inactive on silence
//! - **Anti-entropy**: snapshot exchange repairs replicas that missed writes
//! - **Transport-agnostic**: implement [`transport::PeerTransport`] for your wire
//! - **In-memory**: nothing is persisted
//!
//! # Quick Start
//!
//! ```rust
//! use quorumkv::{consistency::ConsistencyLevel, sim::LocalNetwork, NodeConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let network = LocalNetwork::new();
//! let node = network.spawn_node(NodeConfig::new("127.0.0.1:7001"));
//!
//! node.create("key", b"value".to_vec(), ConsistencyLevel::One).await.unwrap();
//! let read = node.read("key").unwrap();
//! assert_eq!(read.value, b"value");
//! assert_eq!(read.version, 1);
//! # }
//! ```
//!
//! # Known gap
//!
//! Deletes leave no tombstone. A snapshot from a peer that never saw the
//! delete brings the key back.
//!
//! # Non-goals
//!
//! - Durable persistence
//! - Linearizable consistency
//! - Multi-key transactions
//! - Authentication or access control

pub mod anti_entropy;
pub mod config;
pub mod consistency;
pub mod coordinator;
pub mod error;
pub mod heartbeat;
pub mod membership;
pub mod node;
pub mod ops;
pub mod sim;
pub mod store;
pub mod task;
pub mod transport;
pub mod types;

pub use config::NodeConfig;
pub use error::KvError;
pub use node::Node;
