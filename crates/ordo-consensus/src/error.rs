//! Ordering error types

use ordo_types::ViewNumber;
use thiserror::Error;

use crate::types::ReplicaId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("Replica {replica} is not a member of the cluster")]
    ReplicaNotInCluster { replica: ReplicaId },

    #[error("Cluster of {size} replicas cannot tolerate any Byzantine fault (need at least 4)")]
    ClusterTooSmall { size: usize },

    #[error("Cannot install view {requested}, current view is {current}")]
    ViewMovedBackward {
        current: ViewNumber,
        requested: ViewNumber,
    },
}
