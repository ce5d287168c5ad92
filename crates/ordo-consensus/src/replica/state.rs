//! Replica state structure.
//!
//! This module defines [`ReplicaState`], the state of one ordering replica.
//! The state is cloneable for simulation testing and pure: handlers take
//! the local clock reading as an argument and perform no I/O. The ledger
//! commit path is the one owned collaborator, held as a
//! [`CommitApplier`] so that a committed batch is applied in the same turn
//! that reaches quorum.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use ordo_ledger::CommitApplier;
use ordo_types::{LedgerId, PpSeqNo, ThreePhaseKey, Timestamp, Txn, ViewNumber};

use crate::config::ClusterConfig;
use crate::error::OrderingError;
use crate::message::{Message, PrePrepare, Prepare};
use crate::suspicion::SuspicionTracker;
use crate::timestamp::TimestampConfig;
use crate::types::{ReplicaId, ReplicaRole};

use super::{ReplicaEvent, ReplicaOutput};

// ============================================================================
// Message Deduplication
// ============================================================================

/// Unique identifier for a message (for deduplication).
///
/// Delivery may duplicate messages; a replica must not count the same
/// sender twice toward a quorum, and must not record the same violation
/// twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MessageId {
    /// Sender replica ID.
    pub sender: ReplicaId,
    /// Message type discriminant (0=PrePrepare, 1=Prepare, 2=Commit).
    pub msg_type: u8,
    /// The ordering decision the message refers to.
    pub key: ThreePhaseKey,
}

impl MessageId {
    pub fn pre_prepare(sender: ReplicaId, key: ThreePhaseKey) -> Self {
        Self {
            sender,
            msg_type: 0,
            key,
        }
    }

    pub fn prepare(sender: ReplicaId, key: ThreePhaseKey) -> Self {
        Self {
            sender,
            msg_type: 1,
            key,
        }
    }

    pub fn commit(sender: ReplicaId, key: ThreePhaseKey) -> Self {
        Self {
            sender,
            msg_type: 2,
            key,
        }
    }
}

/// Tracks seen messages so duplicates are dropped before processing.
///
/// Entries for views older than `current_view - 1` are pruned when a new
/// view is installed; one old view is kept to absorb delayed messages
/// around the transition.
#[derive(Debug, Clone, Default)]
pub(crate) struct MessageDedupTracker {
    seen: HashSet<MessageId>,
    duplicates: u64,
}

impl MessageDedupTracker {
    /// Returns `Ok(())` if the message is new, `Err(())` if it is a duplicate.
    ///
    /// New messages are recorded as seen.
    pub fn check_and_record(&mut self, msg_id: MessageId) -> Result<(), ()> {
        if self.seen.contains(&msg_id) {
            self.duplicates += 1;
            return Err(());
        }
        self.seen.insert(msg_id);
        Ok(())
    }

    /// Drops entries for views before `min_view`.
    pub fn prune_views_before(&mut self, min_view: ViewNumber) {
        self.seen.retain(|msg_id| msg_id.key.view >= min_view);
    }

    /// Number of duplicate deliveries observed (for diagnostics).
    #[allow(dead_code)]
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

// ============================================================================
// Batch Phase
// ============================================================================

/// How the time check left a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeDisposition {
    /// Plausible; the replica has echoed a Prepare.
    Accepted,

    /// Ahead of the local clock; stashed for re-evaluation.
    Deferred,
}

/// Per-key pipeline phase. Phases only move forward; a key may skip ahead
/// (a commit quorum can form from peers while this replica still defers),
/// but never steps back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    /// PrePrepare admitted, time check not yet run.
    Received,

    /// Time check ran with the given disposition.
    TimeChecked(TimeDisposition),

    /// PREPARE quorum held.
    Prepared,

    /// COMMIT quorum held; batch applied.
    Committed,
}

impl BatchPhase {
    pub(crate) fn rank(&self) -> u8 {
        match self {
            BatchPhase::Received => 0,
            BatchPhase::TimeChecked(_) => 1,
            BatchPhase::Prepared => 2,
            BatchPhase::Committed => 3,
        }
    }

    /// True once the time check has run, whatever the disposition.
    pub fn is_time_checked(&self) -> bool {
        self.rank() >= 1
    }
}

// ============================================================================
// Defer Bookkeeping
// ============================================================================

/// Tracks a stashed proposal awaiting clock catch-up.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeferState {
    /// Local time of the first evaluation; anchors the outer bound.
    pub first_evaluated: Timestamp,

    /// Whether the once-per-key timestamp suspicion has been raised.
    pub suspicion_raised: bool,
}

// ============================================================================
// Replica State
// ============================================================================

/// The state of one ordering replica.
///
/// Generic over the ledger store so tests can substitute instrumented
/// stores; production composes it with the storage collaborator's ledger.
#[derive(Debug, Clone)]
pub struct ReplicaState<L> {
    // ========================================================================
    // Identity
    // ========================================================================
    /// This replica's ID.
    pub(crate) replica_id: ReplicaId,

    /// Cluster membership and quorum sizes.
    pub(crate) config: ClusterConfig,

    /// Timestamp tolerance parameters.
    pub(crate) timestamps: TimestampConfig,

    /// The ledger this replica orders.
    pub(crate) ledger_id: LedgerId,

    // ========================================================================
    // View State
    // ========================================================================
    /// Current view number.
    pub(crate) view: ViewNumber,

    // ========================================================================
    // Proposal Tracking
    // ========================================================================
    /// Highest proposal number minted in this view (primary only).
    pub(crate) last_minted: PpSeqNo,

    /// Highest proposal number admitted in order in this view.
    pub(crate) last_admitted: PpSeqNo,

    /// Admitted PrePrepares, keyed by ordering decision.
    pub(crate) pre_prepares: BTreeMap<ThreePhaseKey, PrePrepare>,

    /// Pipeline phase per key.
    pub(crate) phases: BTreeMap<ThreePhaseKey, BatchPhase>,

    /// Prepares received per key and sender. All retained.
    pub(crate) prepares: HashMap<ThreePhaseKey, BTreeMap<ReplicaId, Prepare>>,

    /// Commit senders per key.
    pub(crate) commits: HashMap<ThreePhaseKey, BTreeSet<ReplicaId>>,

    /// Proposals stashed for timestamp re-evaluation.
    pub(crate) deferred: HashMap<ThreePhaseKey, DeferState>,

    /// Keys this replica has stopped processing (hard violations).
    pub(crate) abandoned: HashSet<ThreePhaseKey>,

    /// Committed keys waiting for a predecessor before they can be applied.
    ///
    /// Commit quorums form independently per key, so a later decision can
    /// commit first under reordered delivery; application still happens in
    /// sequence order to keep the ledger gapless.
    pub(crate) apply_queue: BTreeSet<ThreePhaseKey>,

    /// Highest proposal number applied to the ledger in this view.
    pub(crate) last_applied: PpSeqNo,

    /// Client batches waiting for the mint pipeline to clear (primary only).
    pub(crate) pending_batches: VecDeque<(LedgerId, Vec<Txn>)>,

    /// Batch time of the newest accepted PrePrepare. Non-decreasing within
    /// a view; anchors the backward bound of the time check.
    pub(crate) last_accepted_pre_prepare_time: Timestamp,

    // ========================================================================
    // Bookkeeping
    // ========================================================================
    /// Recorded protocol violations, read by the view-change collaborator.
    pub(crate) suspicions: SuspicionTracker,

    /// Duplicate delivery filter.
    pub(crate) dedup: MessageDedupTracker,

    // ========================================================================
    // Commit Path
    // ========================================================================
    /// Applies committed batches; sole owner of the ledger and range index.
    pub(crate) applier: CommitApplier<L>,
}

impl<L> ReplicaState<L> {
    /// Creates a replica bound to `ledger_id` in view 0.
    ///
    /// The applier must already have the replica's ledger registered.
    pub fn new(
        replica_id: ReplicaId,
        config: ClusterConfig,
        timestamps: TimestampConfig,
        ledger_id: LedgerId,
        applier: CommitApplier<L>,
    ) -> Result<Self, OrderingError> {
        if config.cluster_size() < 4 {
            return Err(OrderingError::ClusterTooSmall {
                size: config.cluster_size(),
            });
        }
        if !config.contains(replica_id) {
            return Err(OrderingError::ReplicaNotInCluster { replica: replica_id });
        }

        Ok(Self {
            replica_id,
            config,
            timestamps,
            ledger_id,
            view: ViewNumber::ZERO,
            last_minted: PpSeqNo::ZERO,
            last_admitted: PpSeqNo::ZERO,
            pre_prepares: BTreeMap::new(),
            phases: BTreeMap::new(),
            prepares: HashMap::new(),
            commits: HashMap::new(),
            deferred: HashMap::new(),
            abandoned: HashSet::new(),
            apply_queue: BTreeSet::new(),
            last_applied: PpSeqNo::ZERO,
            pending_batches: VecDeque::new(),
            last_accepted_pre_prepare_time: Timestamp::EPOCH,
            suspicions: SuspicionTracker::new(),
            dedup: MessageDedupTracker::default(),
            applier,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn ledger_id(&self) -> LedgerId {
        self.ledger_id
    }

    /// This replica's role in the current view, derived from the view
    /// number and the replica ordinal.
    pub fn role(&self) -> ReplicaRole {
        if self.config.primary_for(self.view) == self.replica_id {
            ReplicaRole::Primary
        } else {
            ReplicaRole::NonPrimary
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self.role(), ReplicaRole::Primary)
    }

    /// Batch time of the newest accepted PrePrepare.
    pub fn last_accepted_pre_prepare_time(&self) -> Timestamp {
        self.last_accepted_pre_prepare_time
    }

    /// Pipeline phase of `key`, if this replica has admitted it.
    pub fn phase(&self, key: ThreePhaseKey) -> Option<BatchPhase> {
        self.phases.get(&key).copied()
    }

    /// The PrePrepare held for `key`, if admitted.
    pub fn pre_prepare(&self, key: ThreePhaseKey) -> Option<&PrePrepare> {
        self.pre_prepares.get(&key)
    }

    /// All Prepares received for `key`, by sender.
    pub fn prepares_for(&self, key: ThreePhaseKey) -> impl Iterator<Item = &Prepare> {
        self.prepares.get(&key).into_iter().flatten().map(|(_, p)| p)
    }

    /// Number of distinct Commit senders seen for `key`.
    pub fn commit_count(&self, key: ThreePhaseKey) -> usize {
        self.commits.get(&key).map_or(0, BTreeSet::len)
    }

    /// Client batches queued behind the mint back-pressure gate.
    pub fn pending_batch_count(&self) -> usize {
        self.pending_batches.len()
    }

    /// Read-only view of recorded protocol violations.
    pub fn suspicions(&self) -> &SuspicionTracker {
        &self.suspicions
    }

    /// Read-only view of the commit path (ledger and range index).
    pub fn applier(&self) -> &CommitApplier<L> {
        &self.applier
    }

    // ========================================================================
    // View Installation
    // ========================================================================

    /// Adopts a view decided by the view-change collaborator.
    ///
    /// Resets proposal-number expectations and the accepted-time floor for
    /// the new view. Suspicion counters are left untouched; only the
    /// collaborator may reset those.
    pub fn install_view(&mut self, new_view: ViewNumber) -> Result<(), OrderingError> {
        if new_view < self.view {
            return Err(OrderingError::ViewMovedBackward {
                current: self.view,
                requested: new_view,
            });
        }
        if new_view == self.view {
            return Ok(());
        }

        tracing::info!(
            replica = %self.replica_id,
            old_view = %self.view,
            %new_view,
            "installing new view"
        );

        self.view = new_view;
        self.last_minted = PpSeqNo::ZERO;
        self.last_admitted = PpSeqNo::ZERO;
        self.last_applied = PpSeqNo::ZERO;
        self.last_accepted_pre_prepare_time = Timestamp::EPOCH;

        if !self.apply_queue.is_empty() {
            // Committed but unapplied decisions from the old view are the
            // state-transfer collaborator's to recover.
            tracing::warn!(
                replica = %self.replica_id,
                stranded = self.apply_queue.len(),
                "dropping unapplied committed batches on view change"
            );
            self.apply_queue.clear();
        }

        if !self.pending_batches.is_empty() {
            // Unminted batches belong to the ingestion collaborator now; it
            // resubmits them to the new primary.
            tracing::debug!(
                replica = %self.replica_id,
                dropped = self.pending_batches.len(),
                "dropping unminted batches on view change"
            );
            self.pending_batches.clear();
        }

        let keep_from = ViewNumber::new(new_view.as_u64().saturating_sub(1));
        self.dedup.prune_views_before(keep_from);
        Ok(())
    }

    // ========================================================================
    // Event Dispatch
    // ========================================================================

    /// Processes one event with the given local wall-clock reading.
    ///
    /// This is the actor's single entry point; the runtime calls it once
    /// per queued event.
    pub fn handle(self, event: ReplicaEvent, local_now: Timestamp) -> (Self, ReplicaOutput)
    where
        L: ordo_ledger::LedgerStore,
    {
        match event {
            ReplicaEvent::Message(message) => self.on_message(message, local_now),
            ReplicaEvent::ClientBatch { ledger_id, txns } => {
                self.on_client_batch(ledger_id, txns, local_now)
            }
            ReplicaEvent::TimeRecheck { key } => self.on_time_recheck(key, local_now),
        }
    }

    fn on_message(self, message: Message, local_now: Timestamp) -> (Self, ReplicaOutput)
    where
        L: ordo_ledger::LedgerStore,
    {
        if let Some(to) = message.to
            && to != self.replica_id
        {
            return (self, ReplicaOutput::empty());
        }

        let from = message.from;
        match message.payload {
            crate::message::MessagePayload::PrePrepare(pp) => {
                self.on_pre_prepare(from, pp, local_now)
            }
            crate::message::MessagePayload::Prepare(prepare) => {
                self.on_prepare(from, prepare, local_now)
            }
            crate::message::MessagePayload::Commit(commit) => {
                self.on_commit(from, commit, local_now)
            }
        }
    }
}
