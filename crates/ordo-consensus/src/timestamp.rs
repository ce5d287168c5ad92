//! Batch timestamp acceptability.
//!
//! A primary stamps every PRE-PREPARE with its own wall clock. Replicas
//! cannot trust that value blindly (the primary may lie) nor reject it
//! eagerly (their own clock may be skewed), so each proposal is checked
//! against a window anchored at the replica's local clock and the time of
//! the last accepted batch:
//!
//! ```text
//!          backward tolerance          forward tolerance   defer window
//!        ◄───────────────────┤                 ├─────────►├───────────►
//! ───────┼───────────────────┼─────────────────┼──────────┼────────────
//!        │            last_accepted        local_now      │
//!     Reject ◄──┤       ├──────── Accept ────────┤  Defer ─┤ ► Reject
//! ```
//!
//! A proposal ahead of the forward bound is not proof of a faulty primary:
//! the local clock may simply be behind. Such proposals are re-evaluated
//! after a delay; once local time advances enough, the identical proposal
//! evaluates to Accept. Only a proposal claiming to predate accepted
//! history beyond tolerance is a hard violation.
//!
//! The predicate here is pure; stashing, re-check deadlines, and
//! once-per-key suspicion bookkeeping live in the replica state machine.

use ordo_types::Timestamp;
use serde::{Deserialize, Serialize};

/// Default slack for proposals behind already-accepted history (milliseconds).
pub const DEFAULT_BACKWARD_TOLERANCE_MS: u64 = 2_000;

/// Default slack for proposals ahead of the local clock (milliseconds).
pub const DEFAULT_FORWARD_TOLERANCE_MS: u64 = 2_000;

/// Default width of the defer band beyond the forward bound (milliseconds).
///
/// Proposals in this band are re-evaluated rather than rejected outright;
/// past it, the proposal is rejected immediately.
pub const DEFAULT_DEFER_WINDOW_MS: u64 = 15_000;

/// Default delay before a deferred proposal is re-evaluated (milliseconds).
pub const DEFAULT_RECHECK_DELAY_MS: u64 = 1_000;

const NS_PER_MS: u64 = 1_000_000;

// ============================================================================
// Configuration
// ============================================================================

/// Tolerance parameters for the timestamp check.
///
/// These are deployment parameters: the right values depend on how tightly
/// the cluster's clocks are disciplined. Defaults suit NTP-synchronized
/// hosts on a LAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimestampConfig {
    /// How far a proposal may predate the last accepted batch time.
    pub backward_tolerance_ms: u64,

    /// How far a proposal may run ahead of the local clock.
    pub forward_tolerance_ms: u64,

    /// Width of the defer band beyond the forward bound. Also the outer
    /// bound: a deferral older than this is promoted to a rejection.
    pub defer_window_ms: u64,

    /// Delay before a deferred proposal is re-evaluated.
    pub recheck_delay_ms: u64,
}

impl Default for TimestampConfig {
    fn default() -> Self {
        Self {
            backward_tolerance_ms: DEFAULT_BACKWARD_TOLERANCE_MS,
            forward_tolerance_ms: DEFAULT_FORWARD_TOLERANCE_MS,
            defer_window_ms: DEFAULT_DEFER_WINDOW_MS,
            recheck_delay_ms: DEFAULT_RECHECK_DELAY_MS,
        }
    }
}

impl TimestampConfig {
    pub fn backward_tolerance_nanos(&self) -> u64 {
        self.backward_tolerance_ms * NS_PER_MS
    }

    pub fn forward_tolerance_nanos(&self) -> u64 {
        self.forward_tolerance_ms * NS_PER_MS
    }

    pub fn defer_window_nanos(&self) -> u64 {
        self.defer_window_ms * NS_PER_MS
    }

    pub fn recheck_delay_nanos(&self) -> u64 {
        self.recheck_delay_ms * NS_PER_MS
    }
}

// ============================================================================
// Verdict
// ============================================================================

/// Outcome of evaluating a proposed batch timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeCheck {
    /// The proposal is plausible; the replica may echo it.
    Accept,

    /// The proposal is ahead of the local clock but close enough that a
    /// slow local clock explains it. Re-evaluate later.
    Defer,

    /// The proposal is implausible.
    Reject(RejectReason),
}

/// Why a proposed timestamp was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The proposal predates already-accepted history beyond tolerance.
    /// Hard violation: accepted history cannot move backward.
    BehindAcceptedHistory,

    /// The proposal is ahead of the local clock beyond the defer band.
    BeyondDeferWindow,
}

/// Evaluates a proposed batch timestamp against the local clock and the
/// last accepted batch time.
pub fn evaluate(
    proposed: Timestamp,
    local_now: Timestamp,
    last_accepted: Timestamp,
    config: &TimestampConfig,
) -> TimeCheck {
    let backward_bound = last_accepted.saturating_sub_nanos(config.backward_tolerance_nanos());
    if proposed < backward_bound {
        return TimeCheck::Reject(RejectReason::BehindAcceptedHistory);
    }

    let forward_bound = local_now.saturating_add_nanos(config.forward_tolerance_nanos());
    if proposed <= forward_bound {
        return TimeCheck::Accept;
    }

    let outer_bound = forward_bound.saturating_add_nanos(config.defer_window_nanos());
    if proposed <= outer_bound {
        return TimeCheck::Defer;
    }

    TimeCheck::Reject(RejectReason::BeyondDeferWindow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TimestampConfig {
        TimestampConfig {
            backward_tolerance_ms: 1_000,
            forward_tolerance_ms: 1_000,
            defer_window_ms: 5_000,
            recheck_delay_ms: 500,
        }
    }

    fn at_ms(ms: u64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    #[test]
    fn accepts_within_window() {
        let cfg = config();
        let now = at_ms(100_000);
        let last = at_ms(99_000);

        assert_eq!(evaluate(at_ms(99_500), now, last, &cfg), TimeCheck::Accept);
        // Exactly at the bounds.
        assert_eq!(evaluate(at_ms(98_000), now, last, &cfg), TimeCheck::Accept);
        assert_eq!(evaluate(at_ms(101_000), now, last, &cfg), TimeCheck::Accept);
    }

    #[test]
    fn rejects_behind_accepted_history() {
        let cfg = config();
        let now = at_ms(100_000);
        let last = at_ms(99_000);

        assert_eq!(
            evaluate(at_ms(97_999), now, last, &cfg),
            TimeCheck::Reject(RejectReason::BehindAcceptedHistory)
        );
    }

    #[test]
    fn defers_slightly_ahead_proposals() {
        let cfg = config();
        let now = at_ms(100_000);
        let last = at_ms(99_000);

        assert_eq!(evaluate(at_ms(101_001), now, last, &cfg), TimeCheck::Defer);
        assert_eq!(evaluate(at_ms(106_000), now, last, &cfg), TimeCheck::Defer);
    }

    #[test]
    fn rejects_beyond_defer_window() {
        let cfg = config();
        let now = at_ms(100_000);
        let last = at_ms(99_000);

        assert_eq!(
            evaluate(at_ms(106_001), now, last, &cfg),
            TimeCheck::Reject(RejectReason::BeyondDeferWindow)
        );
    }

    #[test]
    fn defer_becomes_accept_as_clock_advances() {
        // A replica whose clock trails the primary re-evaluates the same
        // proposal and accepts it once its clock catches up.
        let cfg = config();
        let last = at_ms(99_000);
        let proposed = at_ms(103_000);

        assert_eq!(evaluate(proposed, at_ms(100_000), last, &cfg), TimeCheck::Defer);
        assert_eq!(
            evaluate(proposed, at_ms(102_000), last, &cfg),
            TimeCheck::Accept
        );
    }

    #[test]
    fn fresh_replica_accepts_anything_non_future() {
        // last_accepted at the epoch places no backward constraint.
        let cfg = config();
        assert_eq!(
            evaluate(at_ms(50), at_ms(100), Timestamp::EPOCH, &cfg),
            TimeCheck::Accept
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The verdict is monotone in local time: advancing the local
            /// clock never turns an Accept into a Defer or forward Reject.
            #[test]
            fn accept_stable_under_clock_advance(
                proposed in 0u64..10_000_000,
                now in 0u64..10_000_000,
                advance in 0u64..10_000_000,
            ) {
                let cfg = TimestampConfig::default();
                let last = Timestamp::EPOCH;
                let first = evaluate(at_ms(proposed), at_ms(now), last, &cfg);
                let later = evaluate(at_ms(proposed), at_ms(now + advance), last, &cfg);
                if first == TimeCheck::Accept {
                    prop_assert_eq!(later, TimeCheck::Accept);
                }
            }

            /// Every future-time verdict eventually resolves to Accept once
            /// the local clock passes the proposal.
            #[test]
            fn future_proposals_eventually_accept(
                proposed in 1u64..10_000_000,
                now in 0u64..10_000_000,
            ) {
                let cfg = TimestampConfig::default();
                let verdict = evaluate(at_ms(proposed), at_ms(proposed), at_ms(now.min(proposed)), &cfg);
                prop_assert_eq!(verdict, TimeCheck::Accept);
            }

            /// Backward rejections are independent of the local clock.
            #[test]
            fn backward_reject_depends_only_on_history(
                now_a in 0u64..10_000_000,
                now_b in 0u64..10_000_000,
                last in 10_000u64..10_000_000,
            ) {
                let cfg = TimestampConfig::default();
                let proposed = at_ms(last - cfg.backward_tolerance_ms - 1);
                let a = evaluate(proposed, at_ms(now_a), at_ms(last), &cfg);
                let b = evaluate(proposed, at_ms(now_b), at_ms(last), &cfg);
                prop_assert_eq!(a, TimeCheck::Reject(RejectReason::BehindAcceptedHistory));
                prop_assert_eq!(b, TimeCheck::Reject(RejectReason::BehindAcceptedHistory));
            }
        }
    }
}
