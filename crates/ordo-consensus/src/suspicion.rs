//! Protocol violation bookkeeping.
//!
//! A suspicion is an observation, not a verdict: the ordering core records
//! what it saw and keeps going. The view-change collaborator reads the
//! accumulated records and decides whether a primary has earned removal.
//! Counters only ever grow while the core owns them; resetting them is the
//! collaborator's business.

use ordo_types::{PpSeqNo, ThreePhaseKey, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::ReplicaId;

// ============================================================================
// Reasons
// ============================================================================

/// Classified protocol violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SuspicionReason {
    /// A PRE-PREPARE claimed a time predating accepted history beyond tolerance.
    TimestampBehindAccepted,

    /// A PRE-PREPARE claimed a time too far ahead of the local clock, and it
    /// stayed implausible past the defer bound.
    TimestampBeyondDeferWindow,

    /// The primary proposed a PRE-PREPARE out of sequence order.
    OutOfOrderPpSeqNo,

    /// A PREPARE carried a batch time different from the PRE-PREPARE's.
    MismatchedPrepareTime,
}

impl SuspicionReason {
    /// Stable numeric code, for operator tooling and logs.
    pub fn code(&self) -> u16 {
        match self {
            SuspicionReason::TimestampBehindAccepted => 21,
            SuspicionReason::TimestampBeyondDeferWindow => 22,
            SuspicionReason::OutOfOrderPpSeqNo => 23,
            SuspicionReason::MismatchedPrepareTime => 24,
        }
    }
}

/// The value the violation was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObservedValue {
    /// An implausible batch time.
    Time(Timestamp),

    /// An out-of-sequence proposal number.
    Seq(PpSeqNo),
}

// ============================================================================
// Records
// ============================================================================

/// One recorded protocol violation. Append-only; never deleted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspicionRecord {
    /// The replica the violation is attributed to.
    pub accused: ReplicaId,

    /// What kind of violation was observed.
    pub reason: SuspicionReason,

    /// The ordering decision the violation occurred on.
    pub key: ThreePhaseKey,

    /// The offending value.
    pub observed: ObservedValue,

    /// Local time when the violation was recorded.
    pub raised_at: Timestamp,
}

/// Accumulates violations per accused replica.
#[derive(Debug, Clone, Default)]
pub struct SuspicionTracker {
    records: Vec<SuspicionRecord>,
    counts: HashMap<ReplicaId, u64>,
}

impl SuspicionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a violation and bumps the accused replica's counter.
    pub fn record(&mut self, record: SuspicionRecord) {
        tracing::warn!(
            accused = %record.accused,
            reason = ?record.reason,
            code = record.reason.code(),
            key = %record.key,
            observed = ?record.observed,
            "protocol violation recorded"
        );
        *self.counts.entry(record.accused).or_default() += 1;
        self.records.push(record);
    }

    /// Violations attributed to `accused` so far. Non-decreasing.
    pub fn count(&self, accused: ReplicaId) -> u64 {
        self.counts.get(&accused).copied().unwrap_or(0)
    }

    /// Read-only snapshot of every recorded violation, oldest first.
    ///
    /// Consumed by the view-change collaborator; reading never clears.
    pub fn records(&self) -> &[SuspicionRecord] {
        &self.records
    }

    /// Total violations recorded across all accused replicas.
    pub fn total(&self) -> u64 {
        self.records.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_types::ViewNumber;

    fn record(accused: u8, reason: SuspicionReason) -> SuspicionRecord {
        SuspicionRecord {
            accused: ReplicaId::new(accused),
            reason,
            key: ThreePhaseKey::new(ViewNumber::ZERO, PpSeqNo::new(1)),
            observed: ObservedValue::Time(Timestamp::from_secs(1)),
            raised_at: Timestamp::from_secs(2),
        }
    }

    #[test]
    fn counts_accumulate_per_accused() {
        let mut tracker = SuspicionTracker::new();
        assert_eq!(tracker.count(ReplicaId::new(0)), 0);

        tracker.record(record(0, SuspicionReason::TimestampBehindAccepted));
        tracker.record(record(0, SuspicionReason::OutOfOrderPpSeqNo));
        tracker.record(record(2, SuspicionReason::MismatchedPrepareTime));

        assert_eq!(tracker.count(ReplicaId::new(0)), 2);
        assert_eq!(tracker.count(ReplicaId::new(2)), 1);
        assert_eq!(tracker.count(ReplicaId::new(1)), 0);
        assert_eq!(tracker.total(), 3);
    }

    #[test]
    fn snapshot_is_non_destructive() {
        let mut tracker = SuspicionTracker::new();
        tracker.record(record(1, SuspicionReason::TimestampBeyondDeferWindow));

        assert_eq!(tracker.records().len(), 1);
        assert_eq!(tracker.records().len(), 1);
        assert_eq!(tracker.count(ReplicaId::new(1)), 1);
    }

    #[test]
    fn reason_codes_are_distinct() {
        let codes = [
            SuspicionReason::TimestampBehindAccepted.code(),
            SuspicionReason::TimestampBeyondDeferWindow.code(),
            SuspicionReason::OutOfOrderPpSeqNo.code(),
            SuspicionReason::MismatchedPrepareTime.code(),
        ];
        let mut deduped = codes.to_vec();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), codes.len());
    }
}
