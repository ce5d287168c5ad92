//! # ordo-consensus: Byzantine-fault-tolerant ordering core
//!
//! This crate implements the three-phase ordering pipeline that agrees on a
//! deterministic order and commit timestamp for transaction batches:
//!
//! ```text
//! PRE-PREPARE ──► PREPARE (2f matching) ──► COMMIT (2f+1) ──► ledger
//! ```
//!
//! One replica is primary for a view and stamps each batch with a proposed
//! time; every replica independently judges that time against its own clock
//! before echoing. A replica with a slow clock defers instead of rejecting,
//! so an honest primary is not punished for someone else's skew, while a
//! primary that lies about time collects suspicions that the view-change
//! collaborator can act on.
//!
//! # Key Types
//!
//! - [`ReplicaState`]: the per-replica ordering state machine
//! - [`Message`] / [`MessagePayload`]: the three protocol messages
//! - [`TimestampConfig`] / [`evaluate`]: the timestamp acceptability check
//! - [`SuspicionTracker`]: protocol violation bookkeeping
//! - [`ClusterConfig`]: membership and quorum arithmetic
//!
//! # Collaborators
//!
//! Client ingestion, transport, persistent storage, and view-change
//! leadership live outside this crate. The replica consumes validated
//! batches and delivered messages, and produces messages to send, timers
//! to arm, and committed batches applied through
//! [`ordo_ledger::CommitApplier`].

pub mod config;
pub mod error;
pub mod message;
pub mod replica;
pub mod suspicion;
pub mod timestamp;
pub mod types;

pub use config::ClusterConfig;
pub use error::OrderingError;
pub use message::{Commit, Message, MessagePayload, PrePrepare, Prepare};
pub use replica::{
    BatchPhase, CommittedBatch, ReplicaEvent, ReplicaOutput, ReplicaState, TimeDisposition,
    TimerRequest,
};
pub use suspicion::{
    ObservedValue, SuspicionReason, SuspicionRecord, SuspicionTracker,
};
pub use timestamp::{RejectReason, TimeCheck, TimestampConfig, evaluate};
pub use types::{ReplicaId, ReplicaRole};
