//! Replica ordering state machine.
//!
//! This module implements the three-phase ordering pipeline as a pure,
//! deterministic state machine:
//! - Takes messages/events plus the local wall-clock reading as input
//! - Produces new state, outgoing messages, timers, and committed batches
//! - No I/O, no ambient clocks, no randomness
//!
//! Each replica is a sequential actor: it processes one event at a time,
//! so quorum counting needs no internal locking. The runtime feeds it
//! received messages, client batches (primary only), and fired timers, and
//! is responsible for delivering its output.
//!
//! # Protocol Overview
//!
//! ```text
//! Client ──Batch──► Primary
//!                     │
//!                     ├──PrePrepare──► All (incl. self)
//!                     │
//!            time check on every replica
//!                     │
//!                     ├──Prepare────► All      (on Accept)
//!                     │   ▼ (2f matching)
//!                     ├──Commit─────► All
//!                     │   ▼ (2f+1)
//!              apply to ledger, tag seq range
//! ```
//!
//! A replica whose clock trails the primary defers the time check instead
//! of rejecting: the proposal is stashed and re-evaluated on a timer until
//! the local clock catches up or the defer bound expires.
//!
//! # Key Types
//!
//! - [`ReplicaState`]: the state machine state
//! - [`ReplicaEvent`]: inputs that trigger transitions
//! - [`ReplicaOutput`]: messages, timers, and commits produced

mod normal;
mod state;

pub use state::{BatchPhase, ReplicaState, TimeDisposition};

use ordo_types::{LedgerId, SeqNoRange, ThreePhaseKey, Timestamp, Txn};

use crate::message::{Message, MessagePayload};
use crate::types::ReplicaId;

// ============================================================================
// Replica Event
// ============================================================================

/// Events that can trigger replica state transitions.
#[derive(Debug, Clone)]
pub enum ReplicaEvent {
    /// Received a message from another replica (or this one, via broadcast).
    Message(Message),

    /// Client-ingestion collaborator delivered a validated batch (primary only).
    ClientBatch {
        /// Target ledger.
        ledger_id: LedgerId,
        /// Validated, ordered transaction records.
        txns: Vec<Txn>,
    },

    /// A deferred time check's re-evaluation timer fired.
    TimeRecheck {
        /// The ordering decision to re-evaluate.
        key: ThreePhaseKey,
    },
}

// ============================================================================
// Timer Request
// ============================================================================

/// A timer the runtime should arm on the replica's behalf.
///
/// The timer is a re-entry into this replica's own event queue: when the
/// deadline passes, the runtime feeds back [`ReplicaEvent::TimeRecheck`].
/// Firing for a key that has moved on is harmless (the handler no-ops), so
/// the runtime never needs to cancel timers explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerRequest {
    /// The ordering decision to re-check.
    pub key: ThreePhaseKey,

    /// Earliest local time at which to fire.
    pub deadline: Timestamp,
}

// ============================================================================
// Committed Batch
// ============================================================================

/// Record of one batch this replica committed and applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedBatch {
    /// The ordering decision that produced the batch.
    pub key: ThreePhaseKey,

    /// The agreed batch time, stamped on every committed transaction.
    pub pp_time: Timestamp,

    /// Ledger the batch landed on.
    pub ledger_id: LedgerId,

    /// Sequence numbers the batch occupies.
    pub range: SeqNoRange,
}

// ============================================================================
// Replica Output
// ============================================================================

/// Output produced by the replica state machine.
///
/// The caller (runtime) is responsible for:
/// 1. Sending the outgoing messages via the transport
/// 2. Arming the requested timers
/// 3. Surfacing committed batches to observers
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplicaOutput {
    /// Messages to send to other replicas.
    pub messages: Vec<Message>,

    /// Timers to arm for deferred re-evaluation.
    pub timers: Vec<TimerRequest>,

    /// Batches committed and applied while processing the event.
    pub committed: Vec<CommittedBatch>,
}

impl ReplicaOutput {
    /// Creates an empty output.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates output with only messages.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Returns true if nothing was produced.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.timers.is_empty() && self.committed.is_empty()
    }

    /// Merges another output into this one.
    pub fn merge(&mut self, other: ReplicaOutput) {
        self.messages.extend(other.messages);
        self.timers.extend(other.timers);
        self.committed.extend(other.committed);
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Creates a broadcast message from this replica.
pub(crate) fn msg_broadcast(from: ReplicaId, payload: MessagePayload) -> Message {
    Message::broadcast(from, payload)
}
