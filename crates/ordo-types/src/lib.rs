//! # ordo-types: Core types for `Ordo`
//!
//! This crate contains shared types used across the `Ordo` ordering system:
//! - Ledger identifiers ([`LedgerId`])
//! - Sequence numbers and ranges ([`SeqNo`], [`SeqNoRange`])
//! - Temporal types ([`Timestamp`])
//! - Ordering identifiers ([`ViewNumber`], [`PpSeqNo`], [`ThreePhaseKey`])
//! - Transaction records ([`Txn`])

use std::{
    fmt::Display,
    time::{SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ============================================================================
// Ledger Identifier - Copy (1-byte value)
// ============================================================================

/// Unique identifier for a ledger within a node.
///
/// A node hosts several ledgers; the domain ledger carries application
/// transactions and is ordered by the master replica.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct LedgerId(u8);

impl LedgerId {
    /// The pool ledger (node membership).
    pub const POOL: LedgerId = LedgerId(0);

    /// The domain ledger (application transactions).
    pub const DOMAIN: LedgerId = LedgerId(1);

    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl Display for LedgerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for LedgerId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<LedgerId> for u8 {
    fn from(id: LedgerId) -> Self {
        id.0
    }
}

// ============================================================================
// Sequence Numbers - Copy (8-byte values)
// ============================================================================

/// Position of a committed transaction within a ledger.
///
/// Sequence numbers are one-indexed and contiguous: the first committed
/// transaction has sequence number 1, the second 2, and so on. Zero is
/// reserved to mean "nothing committed yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct SeqNo(u64);

impl SeqNo {
    /// Sentinel for an empty ledger (no transaction has this number).
    pub const ZERO: SeqNo = SeqNo(0);

    pub fn new(seq_no: u64) -> Self {
        Self(seq_no)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    pub fn next(&self) -> SeqNo {
        SeqNo(self.0 + 1)
    }
}

impl Display for SeqNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SeqNo {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<SeqNo> for u64 {
    fn from(seq_no: SeqNo) -> Self {
        seq_no.0
    }
}

/// An inclusive range of committed sequence numbers `[start, end]`.
///
/// Produced by a ledger commit: a batch of `n` transactions committed on
/// top of `k` existing ones yields the range `[k + 1, k + n]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeqNoRange {
    start: SeqNo,
    end: SeqNo,
}

impl SeqNoRange {
    /// Creates a new inclusive range.
    ///
    /// # Panics
    ///
    /// Panics if `start` is zero or greater than `end`.
    pub fn new(start: SeqNo, end: SeqNo) -> Self {
        assert!(start > SeqNo::ZERO, "sequence numbers are one-indexed");
        assert!(
            start <= end,
            "range start {start} must not exceed end {end}"
        );
        Self { start, end }
    }

    pub fn start(&self) -> SeqNo {
        self.start
    }

    pub fn end(&self) -> SeqNo {
        self.end
    }

    /// Number of sequence numbers covered by the range.
    pub fn len(&self) -> u64 {
        self.end.0 - self.start.0 + 1
    }

    pub fn is_empty(&self) -> bool {
        false // ranges are non-empty by construction
    }

    /// Returns true if `seq_no` falls within the range.
    pub fn contains(&self, seq_no: SeqNo) -> bool {
        self.start <= seq_no && seq_no <= self.end
    }

    /// Iterates over every sequence number in the range.
    pub fn iter(&self) -> impl Iterator<Item = SeqNo> {
        (self.start.0..=self.end.0).map(SeqNo)
    }
}

impl Display for SeqNoRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

// ============================================================================
// Timestamp - Copy (8-byte value with monotonic guarantee)
// ============================================================================

/// A point in time, in nanoseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch (1970-01-01 00:00:00 UTC).
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Creates a timestamp from nanoseconds since Unix epoch.
    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Creates a timestamp from milliseconds since Unix epoch.
    pub fn from_millis(millis: u64) -> Self {
        Self(millis * 1_000_000)
    }

    /// Creates a timestamp from seconds since Unix epoch.
    pub fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000_000_000)
    }

    /// Returns the timestamp as nanoseconds since Unix epoch.
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Returns the timestamp as seconds since Unix epoch (truncates nanoseconds).
    pub fn as_secs(&self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Creates a timestamp for the current time.
    ///
    /// # Panics
    ///
    /// Panics if the system clock is before Unix epoch (should never happen).
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is before Unix epoch");
        Self(duration.as_nanos() as u64)
    }

    /// Creates a timestamp ensuring monotonicity: `max(now, last + 1ns)`.
    ///
    /// This guarantees that each timestamp is strictly greater than the
    /// previous, even if the system clock moves backwards.
    ///
    /// # Arguments
    ///
    /// * `last` - The previous timestamp, if any. Pass `None` for the first timestamp.
    pub fn now_monotonic(last: Option<Timestamp>) -> Self {
        let now = Self::now();
        match last {
            Some(prev) => {
                if now.0 <= prev.0 {
                    Timestamp(prev.0.saturating_add(1))
                } else {
                    now
                }
            }
            None => now,
        }
    }

    /// Returns the timestamp moved forward by `nanos` nanoseconds, saturating.
    pub fn saturating_add_nanos(&self, nanos: u64) -> Timestamp {
        Timestamp(self.0.saturating_add(nanos))
    }

    /// Returns the timestamp moved backward by `nanos` nanoseconds, saturating at the epoch.
    pub fn saturating_sub_nanos(&self, nanos: u64) -> Timestamp {
        Timestamp(self.0.saturating_sub(nanos))
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Timestamp> for u64 {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

// ============================================================================
// Ordering Identifiers - Copy (8-byte values)
// ============================================================================

/// An epoch during which one replica acts as primary.
///
/// View numbers only move forward; a view change (driven by an external
/// collaborator) installs `view + 1` or higher.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ViewNumber(u64);

impl ViewNumber {
    /// The initial view.
    pub const ZERO: ViewNumber = ViewNumber(0);

    pub fn new(view: u64) -> Self {
        Self(view)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next view number.
    pub fn next(&self) -> ViewNumber {
        ViewNumber(self.0 + 1)
    }
}

impl Display for ViewNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ViewNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<ViewNumber> for u64 {
    fn from(view: ViewNumber) -> Self {
        view.0
    }
}

/// Position of a PRE-PREPARE within a view.
///
/// Strictly increasing while the view lasts; resets to zero ("nothing
/// proposed yet") when a new view is installed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct PpSeqNo(u64);

impl PpSeqNo {
    /// Sentinel for "no PRE-PREPARE issued yet in this view".
    pub const ZERO: PpSeqNo = PpSeqNo(0);

    pub fn new(seq_no: u64) -> Self {
        Self(seq_no)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the next PRE-PREPARE sequence number.
    pub fn next(&self) -> PpSeqNo {
        PpSeqNo(self.0 + 1)
    }
}

impl Display for PpSeqNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PpSeqNo {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<PpSeqNo> for u64 {
    fn from(seq_no: PpSeqNo) -> Self {
        seq_no.0
    }
}

/// Identifier of one ordering decision: `(view, pp_seq_no)`.
///
/// Every committed batch traces back to exactly one key, and the key never
/// changes once minted. Keys order first by view, then by sequence number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ThreePhaseKey {
    /// View in which the batch was proposed.
    pub view: ViewNumber,

    /// Position of the proposal within the view.
    pub pp_seq_no: PpSeqNo,
}

impl ThreePhaseKey {
    pub fn new(view: ViewNumber, pp_seq_no: PpSeqNo) -> Self {
        Self { view, pp_seq_no }
    }
}

impl Display for ThreePhaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.view, self.pp_seq_no)
    }
}

// ============================================================================
// Transaction Record
// ============================================================================

/// An opaque, validated transaction record.
///
/// The payload is produced and signature-checked by the client-ingestion
/// collaborator; the ordering core never inspects it. Sequence number and
/// commit time are stamped by the ledger when the transaction is staged:
/// every transaction in a batch carries the batch's PRE-PREPARE time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txn {
    payload: Bytes,
    seq_no: Option<SeqNo>,
    txn_time: Option<Timestamp>,
}

impl Txn {
    /// Creates an unstamped transaction from an opaque payload.
    pub fn new(payload: Bytes) -> Self {
        Self {
            payload,
            seq_no: None,
            txn_time: None,
        }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The assigned sequence number, if the transaction has been staged.
    pub fn seq_no(&self) -> Option<SeqNo> {
        self.seq_no
    }

    /// The assigned commit time, if the transaction has been staged.
    pub fn txn_time(&self) -> Option<Timestamp> {
        self.txn_time
    }

    /// Stamps the sequence number (ledger staging only).
    pub fn set_seq_no(&mut self, seq_no: SeqNo) {
        self.seq_no = Some(seq_no);
    }

    /// Stamps the commit time (ledger staging only).
    pub fn set_txn_time(&mut self, txn_time: Timestamp) {
        self.txn_time = Some(txn_time);
    }
}

impl From<Bytes> for Txn {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn seq_no_is_one_indexed() {
        assert_eq!(SeqNo::ZERO.next(), SeqNo::new(1));
        assert_eq!(SeqNo::new(41).next().as_u64(), 42);
    }

    #[test_case(1, 1, 1 ; "single element")]
    #[test_case(1, 5, 5 ; "five elements")]
    #[test_case(10, 12, 3 ; "offset range")]
    fn seq_no_range_len(start: u64, end: u64, expected: u64) {
        let range = SeqNoRange::new(SeqNo::new(start), SeqNo::new(end));
        assert_eq!(range.len(), expected);
    }

    #[test]
    fn seq_no_range_contains_bounds() {
        let range = SeqNoRange::new(SeqNo::new(3), SeqNo::new(7));
        assert!(range.contains(SeqNo::new(3)));
        assert!(range.contains(SeqNo::new(7)));
        assert!(!range.contains(SeqNo::new(2)));
        assert!(!range.contains(SeqNo::new(8)));
    }

    #[test]
    #[should_panic(expected = "one-indexed")]
    fn seq_no_range_rejects_zero_start() {
        let _ = SeqNoRange::new(SeqNo::ZERO, SeqNo::new(1));
    }

    #[test]
    fn timestamp_monotonic_never_decreases() {
        let high = Timestamp::from_nanos(u64::MAX - 1);
        let next = Timestamp::now_monotonic(Some(high));
        assert!(next > high);
    }

    #[test]
    fn timestamp_saturating_arithmetic() {
        let ts = Timestamp::from_millis(5);
        assert_eq!(ts.saturating_sub_nanos(u64::MAX), Timestamp::EPOCH);
        assert_eq!(
            ts.saturating_add_nanos(1_000_000),
            Timestamp::from_millis(6)
        );
    }

    #[test]
    fn three_phase_key_orders_by_view_then_seq() {
        let a = ThreePhaseKey::new(ViewNumber::new(0), PpSeqNo::new(9));
        let b = ThreePhaseKey::new(ViewNumber::new(1), PpSeqNo::new(1));
        let c = ThreePhaseKey::new(ViewNumber::new(1), PpSeqNo::new(2));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn three_phase_key_display() {
        let key = ThreePhaseKey::new(ViewNumber::new(2), PpSeqNo::new(17));
        assert_eq!(key.to_string(), "(2, 17)");
    }

    #[test]
    fn txn_stamping_round_trip() {
        let mut txn = Txn::new(Bytes::from_static(b"payload"));
        assert!(txn.seq_no().is_none());
        assert!(txn.txn_time().is_none());

        txn.set_seq_no(SeqNo::new(4));
        txn.set_txn_time(Timestamp::from_secs(100));

        assert_eq!(txn.seq_no(), Some(SeqNo::new(4)));
        assert_eq!(txn.txn_time(), Some(Timestamp::from_secs(100)));
        assert_eq!(txn.payload().as_ref(), b"payload");
    }

    #[test]
    fn txn_serde_round_trip() {
        let mut txn = Txn::new(Bytes::from_static(b"abc"));
        txn.set_seq_no(SeqNo::new(1));
        txn.set_txn_time(Timestamp::from_secs(7));

        let json = serde_json::to_string(&txn).expect("serialize");
        let back: Txn = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, txn);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn range_iter_matches_len(start in 1u64..1_000, extra in 0u64..100) {
                let range = SeqNoRange::new(SeqNo::new(start), SeqNo::new(start + extra));
                prop_assert_eq!(range.iter().count() as u64, range.len());
            }

            #[test]
            fn range_iter_all_contained(start in 1u64..1_000, extra in 0u64..100) {
                let range = SeqNoRange::new(SeqNo::new(start), SeqNo::new(start + extra));
                for seq_no in range.iter() {
                    prop_assert!(range.contains(seq_no));
                }
            }

            #[test]
            fn monotonic_timestamp_strictly_increases(last in 0u64..u64::MAX / 2) {
                let last = Timestamp::from_nanos(last);
                let next = Timestamp::now_monotonic(Some(last));
                prop_assert!(next > last);
            }
        }
    }
}
