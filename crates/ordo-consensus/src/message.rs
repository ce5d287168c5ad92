//! Three-phase ordering protocol messages.
//!
//! One batch travels through three message types:
//!
//! - [`PrePrepare`] - Primary → All: order this batch at (view, seq) with this time
//! - [`Prepare`] - Replica → All: I find the proposal plausible
//! - [`Commit`] - Replica → All: I hold a PREPARE quorum for this key
//!
//! Serialization and transport belong to the messaging collaborator; this
//! module only fixes the shapes. Delivery may duplicate or reorder
//! messages, so receivers deduplicate and tolerate early arrivals.

use ordo_types::{LedgerId, ThreePhaseKey, Timestamp, Txn, ViewNumber};
use serde::{Deserialize, Serialize};

use crate::types::ReplicaId;

// ============================================================================
// Message Envelope
// ============================================================================

/// A protocol message with routing information.
///
/// All messages are wrapped in this envelope, which carries the sender's
/// identity. Authentication of the sender is the transport collaborator's
/// responsibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The replica that sent this message.
    pub from: ReplicaId,

    /// The intended recipient.
    ///
    /// `None` for broadcast messages.
    pub to: Option<ReplicaId>,

    /// The message payload.
    pub payload: MessagePayload,
}

impl Message {
    /// Creates a new targeted message.
    pub fn targeted(from: ReplicaId, to: ReplicaId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: Some(to),
            payload,
        }
    }

    /// Creates a new broadcast message.
    pub fn broadcast(from: ReplicaId, payload: MessagePayload) -> Self {
        Self {
            from,
            to: None,
            payload,
        }
    }

    /// Returns true if this message is a broadcast.
    pub fn is_broadcast(&self) -> bool {
        self.to.is_none()
    }
}

// ============================================================================
// Message Payload
// ============================================================================

/// The payload of an ordering protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessagePayload {
    /// Primary → All: order this batch.
    PrePrepare(PrePrepare),

    /// Replica → All: the proposal is plausible.
    Prepare(Prepare),

    /// Replica → All: a PREPARE quorum is held for this key.
    Commit(Commit),
}

impl MessagePayload {
    /// Returns the ordering key the message refers to.
    pub fn key(&self) -> ThreePhaseKey {
        match self {
            MessagePayload::PrePrepare(m) => m.key,
            MessagePayload::Prepare(m) => m.key,
            MessagePayload::Commit(m) => m.key,
        }
    }

    /// Returns the view the message belongs to.
    pub fn view(&self) -> ViewNumber {
        self.key().view
    }

    /// Returns a human-readable name for the message type.
    pub fn name(&self) -> &'static str {
        match self {
            MessagePayload::PrePrepare(_) => "PrePrepare",
            MessagePayload::Prepare(_) => "Prepare",
            MessagePayload::Commit(_) => "Commit",
        }
    }
}

// ============================================================================
// PrePrepare
// ============================================================================

/// Primary → All: order this batch.
///
/// Created once by the primary for its key and never mutated afterwards.
/// The batch time `pp_time` is the commit time every transaction in the
/// batch will carry if the batch commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare {
    /// The ordering decision this proposal mints.
    pub key: ThreePhaseKey,

    /// Proposed batch time, from the primary's clock.
    pub pp_time: Timestamp,

    /// Target ledger.
    pub ledger_id: LedgerId,

    /// The ordered transaction batch.
    pub txns: Vec<Txn>,
}

impl PrePrepare {
    /// Creates a new PrePrepare.
    ///
    /// # Panics
    ///
    /// Panics if the batch is empty; an empty proposal orders nothing.
    pub fn new(key: ThreePhaseKey, pp_time: Timestamp, ledger_id: LedgerId, txns: Vec<Txn>) -> Self {
        assert!(!txns.is_empty(), "a PrePrepare must carry at least one txn");
        Self {
            key,
            pp_time,
            ledger_id,
            txns,
        }
    }
}

// ============================================================================
// Prepare
// ============================================================================

/// Replica → All: the proposal for `key` is plausible.
///
/// Echoes the batch time so every replica can verify that all replicas
/// prepared the same (key, time) pair. One Prepare per (key, sender).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    /// The ordering decision being echoed.
    pub key: ThreePhaseKey,

    /// Batch time from the PRE-PREPARE this replica holds.
    pub pp_time: Timestamp,

    /// Replica sending the Prepare.
    pub replica: ReplicaId,
}

impl Prepare {
    /// Creates a new Prepare.
    pub fn new(key: ThreePhaseKey, pp_time: Timestamp, replica: ReplicaId) -> Self {
        Self {
            key,
            pp_time,
            replica,
        }
    }
}

// ============================================================================
// Commit
// ============================================================================

/// Replica → All: a PREPARE quorum is held for `key`.
///
/// One Commit per (key, sender). Carries no time: the time was fixed by
/// the PREPARE round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// The ordering decision being committed.
    pub key: ThreePhaseKey,

    /// Replica sending the Commit.
    pub replica: ReplicaId,
}

impl Commit {
    /// Creates a new Commit.
    pub fn new(key: ThreePhaseKey, replica: ReplicaId) -> Self {
        Self { key, replica }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ordo_types::PpSeqNo;

    fn key(view: u64, seq: u64) -> ThreePhaseKey {
        ThreePhaseKey::new(ViewNumber::new(view), PpSeqNo::new(seq))
    }

    fn txn(tag: &str) -> Txn {
        Txn::new(Bytes::from(tag.to_owned()))
    }

    #[test]
    fn payload_accessors() {
        let pp = PrePrepare::new(
            key(3, 7),
            Timestamp::from_secs(5),
            LedgerId::DOMAIN,
            vec![txn("a")],
        );
        let payload = MessagePayload::PrePrepare(pp);

        assert_eq!(payload.key(), key(3, 7));
        assert_eq!(payload.view(), ViewNumber::new(3));
        assert_eq!(payload.name(), "PrePrepare");
    }

    #[test]
    fn broadcast_and_targeted_routing() {
        let prepare = Prepare::new(key(0, 1), Timestamp::from_secs(1), ReplicaId::new(2));
        let broadcast = Message::broadcast(ReplicaId::new(2), MessagePayload::Prepare(prepare));
        assert!(broadcast.is_broadcast());

        let commit = Commit::new(key(0, 1), ReplicaId::new(2));
        let targeted = Message::targeted(
            ReplicaId::new(2),
            ReplicaId::new(0),
            MessagePayload::Commit(commit),
        );
        assert!(!targeted.is_broadcast());
        assert_eq!(targeted.to, Some(ReplicaId::new(0)));
    }

    #[test]
    #[should_panic(expected = "at least one txn")]
    fn empty_pre_prepare_rejected() {
        let _ = PrePrepare::new(key(0, 1), Timestamp::EPOCH, LedgerId::DOMAIN, vec![]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn pre_prepare_serde_round_trip(view in 0u64..1000, seq in 1u64..1000, secs in 0u64..1_700_000_000) {
                let pp = PrePrepare::new(
                    key(view, seq),
                    Timestamp::from_secs(secs),
                    LedgerId::DOMAIN,
                    vec![txn("payload")],
                );
                let json = serde_json::to_string(&pp).expect("serialize");
                let back: PrePrepare = serde_json::from_str(&json).expect("deserialize");
                prop_assert_eq!(back, pp);
            }

            #[test]
            fn prepare_serde_round_trip(view in 0u64..1000, seq in 1u64..1000, replica in 0u8..16) {
                let prepare = Prepare::new(key(view, seq), Timestamp::from_secs(9), ReplicaId::new(replica));
                let json = serde_json::to_string(&prepare).expect("serialize");
                let back: Prepare = serde_json::from_str(&json).expect("deserialize");
                prop_assert_eq!(back, prepare);
            }
        }
    }
}
