//! Replica identity, role, and quorum arithmetic.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

// ============================================================================
// Replica Identity
// ============================================================================

/// Identifier of a replica within the cluster (its ordinal).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ReplicaId(u8);

impl ReplicaId {
    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }

    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

impl Display for ReplicaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for ReplicaId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<ReplicaId> for u8 {
    fn from(id: ReplicaId) -> Self {
        id.0
    }
}

// ============================================================================
// Replica Role
// ============================================================================

/// A replica's role for the current view.
///
/// Derived from the view number and the replica ordinal, never stored: the
/// role changes when a view change installs a new view. Role-specific
/// behavior is selected by matching on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaRole {
    /// Proposes order and timestamps for the current view.
    Primary,

    /// Validates and echoes proposals from the primary.
    NonPrimary,
}

impl Display for ReplicaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaRole::Primary => write!(f, "primary"),
            ReplicaRole::NonPrimary => write!(f, "non-primary"),
        }
    }
}

// ============================================================================
// Quorum Arithmetic
// ============================================================================

/// Maximum number of Byzantine replicas a cluster of `cluster_size` tolerates.
///
/// `f = (n - 1) / 3`.
pub fn max_faulty(cluster_size: usize) -> usize {
    cluster_size.saturating_sub(1) / 3
}

/// Matching PREPAREs required for a key to become Prepared: `2f`.
pub fn prepare_quorum(cluster_size: usize) -> usize {
    2 * max_faulty(cluster_size)
}

/// Matching COMMITs required for a key to become Committed: `2f + 1`.
pub fn commit_quorum(cluster_size: usize) -> usize {
    2 * max_faulty(cluster_size) + 1
}
