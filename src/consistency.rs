use crate::error::KvError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// How many replicas must acknowledge a write before it is reported durable
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsistencyLevel {
    One,
    #[default]
    Quorum,
    All,
}

impl ConsistencyLevel {
    /// Acks required for a cluster of `cluster_size` nodes, local node included.
    /// Recompute on every call, the cluster size moves with membership.
    pub fn required_acks(self, cluster_size: usize) -> usize {
        let cluster_size = cluster_size.max(1);
        match self {
            ConsistencyLevel::One => 1,
            ConsistencyLevel::Quorum => cluster_size / 2 + 1,
            ConsistencyLevel::All => cluster_size,
        }
    }

    /// Parse a level name, falling back to `Quorum` for anything unknown
    pub fn parse_lenient(name: &str) -> Self {
        name.parse().unwrap_or_else(|e: KvError| {
            warn!("{e}, falling back to QUORUM");
            ConsistencyLevel::Quorum
        })
    }
}

/// Free-function form of [`ConsistencyLevel::required_acks`]
pub fn required_acks(level: ConsistencyLevel, cluster_size: usize) -> usize {
    level.required_acks(cluster_size)
}

impl FromStr for ConsistencyLevel {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "one" => Ok(ConsistencyLevel::One),
            "quorum" => Ok(ConsistencyLevel::Quorum),
            "all" => Ok(ConsistencyLevel::All),
            _ => Err(KvError::InvalidConsistencyLevel(s.to_string())),
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::All => "ALL",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_for_small_clusters() {
        let expected = [1, 2, 2, 3, 3];
        for (size, want) in (1..=5).zip(expected) {
            assert_eq!(required_acks(ConsistencyLevel::Quorum, size), want, "size {size}");
        }
    }

    #[test]
    fn one_and_all() {
        for size in 1..=5 {
            assert_eq!(ConsistencyLevel::One.required_acks(size), 1);
            assert_eq!(ConsistencyLevel::All.required_acks(size), size);
        }
    }

    #[test]
    fn empty_cluster_counts_self() {
        assert_eq!(ConsistencyLevel::All.required_acks(0), 1);
        assert_eq!(ConsistencyLevel::Quorum.required_acks(0), 1);
    }

    #[test]
    fn parse_levels() {
        assert_eq!("one".parse::<ConsistencyLevel>().unwrap(), ConsistencyLevel::One);
        assert_eq!(" ALL ".parse::<ConsistencyLevel>().unwrap(), ConsistencyLevel::All);
        assert_eq!(
            "eventual".parse::<ConsistencyLevel>(),
            Err(KvError::InvalidConsistencyLevel("eventual".into()))
        );
        assert_eq!(ConsistencyLevel::parse_lenient("eventual"), ConsistencyLevel::Quorum);
        assert_eq!(ConsistencyLevel::parse_lenient("One"), ConsistencyLevel::One);
    }
}
