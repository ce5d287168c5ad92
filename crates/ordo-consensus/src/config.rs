//! Cluster membership and quorum configuration.

use ordo_types::ViewNumber;
use serde::{Deserialize, Serialize};

use crate::types::{ReplicaId, commit_quorum, max_faulty, prepare_quorum};

/// Static cluster membership for one replication group.
///
/// The primary for a view is the replica at ordinal `view mod cluster_size`;
/// the mapping rotates deterministically as views advance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    replicas: Vec<ReplicaId>,
}

impl ClusterConfig {
    /// Creates a cluster configuration from the member list.
    ///
    /// # Panics
    ///
    /// Panics if the member list is empty or contains duplicates.
    pub fn new(replicas: Vec<ReplicaId>) -> Self {
        assert!(!replicas.is_empty(), "cluster must have at least one replica");
        let mut seen = replicas.clone();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(
            seen.len(),
            replicas.len(),
            "cluster members must be distinct"
        );
        Self { replicas }
    }

    /// Convenience constructor for ordinals `0..n`.
    pub fn with_size(n: u8) -> Self {
        Self::new((0..n).map(ReplicaId::new).collect())
    }

    pub fn cluster_size(&self) -> usize {
        self.replicas.len()
    }

    pub fn replicas(&self) -> &[ReplicaId] {
        &self.replicas
    }

    pub fn contains(&self, replica: ReplicaId) -> bool {
        self.replicas.contains(&replica)
    }

    /// Maximum tolerated Byzantine replicas: `f = (n - 1) / 3`.
    pub fn max_faulty(&self) -> usize {
        max_faulty(self.cluster_size())
    }

    /// Matching PREPAREs needed for Prepared: `2f`.
    pub fn prepare_quorum(&self) -> usize {
        prepare_quorum(self.cluster_size())
    }

    /// Matching COMMITs needed for Committed: `2f + 1`.
    pub fn commit_quorum(&self) -> usize {
        commit_quorum(self.cluster_size())
    }

    /// The replica acting as primary in `view`.
    pub fn primary_for(&self, view: ViewNumber) -> ReplicaId {
        let ordinal = (view.as_u64() % self.cluster_size() as u64) as usize;
        self.replicas[ordinal]
    }
}
