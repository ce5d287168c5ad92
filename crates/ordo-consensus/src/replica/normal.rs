//! Ordering protocol handlers.
//!
//! This module implements the handlers for the three-phase pipeline:
//! - Client batch intake and proposal minting (primary)
//! - PrePrepare admission and the timestamp check (all replicas)
//! - Prepare / Commit quorum counting
//! - Deferred time-check re-evaluation
//!
//! A violation never halts the replica: the offending key is abandoned (or
//! stashed for re-check), the suspicion is recorded, and every other key
//! keeps flowing.

use ordo_ledger::LedgerStore;
use ordo_types::{LedgerId, ThreePhaseKey, Timestamp, Txn};

use crate::message::{Commit, MessagePayload, PrePrepare, Prepare};
use crate::suspicion::{ObservedValue, SuspicionReason, SuspicionRecord};
use crate::timestamp::{RejectReason, TimeCheck, evaluate};
use crate::types::ReplicaId;

use super::state::{DeferState, MessageId};
use super::{
    BatchPhase, CommittedBatch, ReplicaOutput, ReplicaState, TimeDisposition, TimerRequest,
    msg_broadcast,
};

impl<L: LedgerStore> ReplicaState<L> {
    // ========================================================================
    // Client Batch Intake (Primary)
    // ========================================================================

    /// Handles a validated client batch from the ingestion collaborator.
    ///
    /// Only the primary mints proposals; a batch arriving anywhere else is
    /// a routing error upstream and is dropped.
    pub(crate) fn on_client_batch(
        mut self,
        ledger_id: LedgerId,
        txns: Vec<Txn>,
        local_now: Timestamp,
    ) -> (Self, ReplicaOutput) {
        if !self.is_primary() {
            tracing::warn!(
                replica = %self.replica_id,
                view = %self.view,
                "client batch delivered to non-primary, ignoring"
            );
            return (self, ReplicaOutput::empty());
        }

        if ledger_id != self.ledger_id {
            tracing::warn!(
                replica = %self.replica_id,
                batch_ledger = %ledger_id,
                our_ledger = %self.ledger_id,
                "client batch for a ledger this replica does not order, ignoring"
            );
            return (self, ReplicaOutput::empty());
        }

        if txns.is_empty() {
            tracing::debug!(replica = %self.replica_id, "empty client batch ignored");
            return (self, ReplicaOutput::empty());
        }

        self.pending_batches.push_back((ledger_id, txns));
        self.try_mint(local_now)
    }

    /// Mints the next proposal if the pipeline allows it.
    ///
    /// Back-pressure: a new PrePrepare is not minted until the previous one
    /// has at least entered the time-checked phase locally. This bounds the
    /// primary's in-flight proposals; held batches are a scheduling delay,
    /// not an error.
    fn try_mint(mut self, local_now: Timestamp) -> (Self, ReplicaOutput) {
        if !self.mint_unblocked() {
            if !self.pending_batches.is_empty() {
                tracing::debug!(
                    replica = %self.replica_id,
                    queued = self.pending_batches.len(),
                    "holding client batches: previous proposal awaiting time check"
                );
            }
            return (self, ReplicaOutput::empty());
        }

        let Some((ledger_id, txns)) = self.pending_batches.pop_front() else {
            return (self, ReplicaOutput::empty());
        };

        let seq = self.last_minted.next();
        self.last_minted = seq;
        let key = ThreePhaseKey::new(self.view, seq);

        // The batch time never steps behind accepted history, even if the
        // local clock does.
        let pp_time = if local_now > self.last_accepted_pre_prepare_time {
            local_now
        } else {
            self.last_accepted_pre_prepare_time
        };

        let txn_count = txns.len();
        let pp = PrePrepare::new(key, pp_time, ledger_id, txns);
        tracing::debug!(
            replica = %self.replica_id,
            %key,
            %pp_time,
            txns = txn_count,
            "minted PrePrepare"
        );

        // Broadcast reaches every replica including this one; the primary
        // admits its own proposal through the same path as everyone else.
        let replica_id = self.replica_id;
        (
            self,
            ReplicaOutput::with_messages(vec![msg_broadcast(
                replica_id,
                MessagePayload::PrePrepare(pp),
            )]),
        )
    }

    fn mint_unblocked(&self) -> bool {
        if self.last_minted == ordo_types::PpSeqNo::ZERO {
            return true;
        }
        let key = ThreePhaseKey::new(self.view, self.last_minted);
        self.phases
            .get(&key)
            .is_some_and(|phase| phase.is_time_checked())
    }

    // ========================================================================
    // PrePrepare Handler
    // ========================================================================

    /// Handles a PrePrepare from the primary (possibly this replica).
    ///
    /// Admission requires the proposal to be the next expected sequence
    /// number for the view; an out-of-order proposal is a violation by the
    /// primary and abandons that key only.
    pub(crate) fn on_pre_prepare(
        mut self,
        from: ReplicaId,
        pp: PrePrepare,
        local_now: Timestamp,
    ) -> (Self, ReplicaOutput) {
        let key = pp.key;

        if key.view != self.view {
            tracing::debug!(
                replica = %self.replica_id,
                our_view = %self.view,
                msg_view = %key.view,
                "PrePrepare from another view, ignoring"
            );
            return (self, ReplicaOutput::empty());
        }

        if self
            .dedup
            .check_and_record(MessageId::pre_prepare(from, key))
            .is_err()
        {
            tracing::debug!(replica = %self.replica_id, %key, "duplicate PrePrepare, ignoring");
            return (self, ReplicaOutput::empty());
        }

        let primary = self.config.primary_for(self.view);
        if from != primary {
            tracing::warn!(
                replica = %self.replica_id,
                %from,
                %primary,
                "PrePrepare from a replica that is not the primary, ignoring"
            );
            return (self, ReplicaOutput::empty());
        }

        if pp.ledger_id != self.ledger_id {
            tracing::warn!(
                replica = %self.replica_id,
                batch_ledger = %pp.ledger_id,
                our_ledger = %self.ledger_id,
                "PrePrepare for a ledger this replica does not order, ignoring"
            );
            return (self, ReplicaOutput::empty());
        }

        let expected = self.last_admitted.next();
        if key.pp_seq_no != expected {
            self.raise_suspicion(
                from,
                SuspicionReason::OutOfOrderPpSeqNo,
                key,
                ObservedValue::Seq(key.pp_seq_no),
                local_now,
            );
            self.abandoned.insert(key);
            tracing::warn!(
                replica = %self.replica_id,
                %key,
                expected = %expected,
                "out-of-order PrePrepare rejected"
            );
            return (self, ReplicaOutput::empty());
        }

        self.last_admitted = key.pp_seq_no;
        self.pre_prepares.insert(key, pp);
        self.phases.insert(key, BatchPhase::Received);

        let (new_self, mut output) = self.run_time_check(key, local_now);
        // A commit quorum may already be waiting from peers that ran ahead.
        let (new_self, commit_output) = new_self.try_committed(key);
        output.merge(commit_output);
        (new_self, output)
    }

    // ========================================================================
    // Timestamp Check
    // ========================================================================

    /// Evaluates (or re-evaluates) the batch time of an admitted proposal.
    fn run_time_check(mut self, key: ThreePhaseKey, local_now: Timestamp) -> (Self, ReplicaOutput) {
        let Some(pp) = self.pre_prepares.get(&key) else {
            return (self, ReplicaOutput::empty());
        };
        let pp_time = pp.pp_time;

        match evaluate(
            pp_time,
            local_now,
            self.last_accepted_pre_prepare_time,
            &self.timestamps,
        ) {
            TimeCheck::Accept => self.accept_pre_prepare(key, local_now),
            TimeCheck::Defer => self.stash_for_recheck(key, pp_time, local_now, false),
            TimeCheck::Reject(RejectReason::BeyondDeferWindow) => {
                // The claim is implausible, but so might be our own clock:
                // record the violation once, keep the proposal stashed, and
                // let a later evaluation clear it if our clock was at fault.
                self.stash_for_recheck(key, pp_time, local_now, true)
            }
            TimeCheck::Reject(RejectReason::BehindAcceptedHistory) => {
                let primary = self.config.primary_for(self.view);
                self.raise_suspicion(
                    primary,
                    SuspicionReason::TimestampBehindAccepted,
                    key,
                    ObservedValue::Time(pp_time),
                    local_now,
                );
                self.abandoned.insert(key);
                self.deferred.remove(&key);
                tracing::warn!(
                    replica = %self.replica_id,
                    %key,
                    proposed = %pp_time,
                    last_accepted = %self.last_accepted_pre_prepare_time,
                    "batch time predates accepted history, abandoning key"
                );
                (self, ReplicaOutput::empty())
            }
        }
    }

    /// Stashes a proposal whose time is ahead of the local clock and arms
    /// the re-evaluation timer.
    ///
    /// The timestamp suspicion is raised at most once per key: immediately
    /// when the claim is beyond the defer band (`force_suspicion`), or on
    /// the re-check that finds the deferral has outlived the outer bound.
    fn stash_for_recheck(
        mut self,
        key: ThreePhaseKey,
        pp_time: Timestamp,
        local_now: Timestamp,
        force_suspicion: bool,
    ) -> (Self, ReplicaOutput) {
        let outer = self.timestamps.defer_window_nanos();
        let entry = self.deferred.entry(key).or_insert(DeferState {
            first_evaluated: local_now,
            suspicion_raised: false,
        });
        let past_outer = local_now >= entry.first_evaluated.saturating_add_nanos(outer);
        let should_raise = (force_suspicion || past_outer) && !entry.suspicion_raised;
        if should_raise {
            entry.suspicion_raised = true;
        }

        if should_raise {
            let primary = self.config.primary_for(self.view);
            self.raise_suspicion(
                primary,
                SuspicionReason::TimestampBeyondDeferWindow,
                key,
                ObservedValue::Time(pp_time),
                local_now,
            );
        }

        self.phases
            .insert(key, BatchPhase::TimeChecked(TimeDisposition::Deferred));

        let deadline = local_now.saturating_add_nanos(self.timestamps.recheck_delay_nanos());
        tracing::debug!(
            replica = %self.replica_id,
            %key,
            proposed = %pp_time,
            %deadline,
            "time check deferred, scheduling re-evaluation"
        );

        let mut output = ReplicaOutput::empty();
        output.timers.push(TimerRequest { key, deadline });
        (self, output)
    }

    /// Handles a fired re-evaluation timer.
    ///
    /// Fires as a no-op when the key has moved on: accepted in the
    /// meantime, committed via peers' messages, abandoned, or left behind
    /// by a view change.
    pub(crate) fn on_time_recheck(
        self,
        key: ThreePhaseKey,
        local_now: Timestamp,
    ) -> (Self, ReplicaOutput) {
        if key.view != self.view {
            tracing::debug!(replica = %self.replica_id, %key, "stale re-check timer, ignoring");
            return (self, ReplicaOutput::empty());
        }
        if !matches!(
            self.phases.get(&key),
            Some(BatchPhase::TimeChecked(TimeDisposition::Deferred))
        ) {
            return (self, ReplicaOutput::empty());
        }
        self.run_time_check(key, local_now)
    }

    /// Records acceptance of a proposal and echoes the Prepare.
    fn accept_pre_prepare(mut self, key: ThreePhaseKey, local_now: Timestamp) -> (Self, ReplicaOutput) {
        let Some(pp) = self.pre_prepares.get(&key) else {
            return (self, ReplicaOutput::empty());
        };
        let pp_time = pp.pp_time;

        self.deferred.remove(&key);
        self.phases
            .insert(key, BatchPhase::TimeChecked(TimeDisposition::Accepted));
        if pp_time > self.last_accepted_pre_prepare_time {
            self.last_accepted_pre_prepare_time = pp_time;
        }

        // Prepares that arrived before the PrePrepare could not be checked
        // against the batch time; settle them now.
        self.validate_stored_prepares(key, pp_time, local_now);

        let prepare = Prepare::new(key, pp_time, self.replica_id);
        self.prepares
            .entry(key)
            .or_default()
            .insert(self.replica_id, prepare);
        // Our own broadcast echoes back; mark it seen so it drops on arrival.
        let _ = self
            .dedup
            .check_and_record(MessageId::prepare(self.replica_id, key));

        tracing::debug!(
            replica = %self.replica_id,
            %key,
            %pp_time,
            "PrePrepare accepted, broadcasting Prepare"
        );

        let mut output = ReplicaOutput::with_messages(vec![msg_broadcast(
            self.replica_id,
            MessagePayload::Prepare(prepare),
        )]);

        if self.is_primary() {
            // The just-checked proposal unblocks the mint gate.
            let (new_self, mint_output) = self.try_mint(local_now);
            self = new_self;
            output.merge(mint_output);
        }

        let (new_self, prepared_output) = self.try_prepared(key);
        output.merge(prepared_output);
        (new_self, output)
    }

    /// Discards stored Prepares whose time does not match the accepted
    /// batch time, suspecting their senders.
    fn validate_stored_prepares(
        &mut self,
        key: ThreePhaseKey,
        pp_time: Timestamp,
        local_now: Timestamp,
    ) {
        let mut mismatched = Vec::new();
        if let Some(map) = self.prepares.get_mut(&key) {
            let bad: Vec<ReplicaId> = map
                .iter()
                .filter(|(_, prepare)| prepare.pp_time != pp_time)
                .map(|(&id, _)| id)
                .collect();
            for id in bad {
                if let Some(prepare) = map.remove(&id) {
                    mismatched.push(prepare);
                }
            }
        }
        for prepare in mismatched {
            self.raise_suspicion(
                prepare.replica,
                SuspicionReason::MismatchedPrepareTime,
                key,
                ObservedValue::Time(prepare.pp_time),
                local_now,
            );
        }
    }

    // ========================================================================
    // Prepare Handler
    // ========================================================================

    /// Handles a Prepare from a peer.
    ///
    /// A Prepare whose batch time disagrees with the locally held
    /// PrePrepare is discarded and suspected against its sender, not the
    /// primary.
    pub(crate) fn on_prepare(
        mut self,
        from: ReplicaId,
        prepare: Prepare,
        local_now: Timestamp,
    ) -> (Self, ReplicaOutput) {
        let key = prepare.key;

        if key.view != self.view {
            tracing::debug!(replica = %self.replica_id, %key, "Prepare from another view, ignoring");
            return (self, ReplicaOutput::empty());
        }

        if from != prepare.replica {
            tracing::warn!(
                replica = %self.replica_id,
                %from,
                claimed = %prepare.replica,
                "Prepare sender does not match envelope, ignoring"
            );
            return (self, ReplicaOutput::empty());
        }

        if self
            .dedup
            .check_and_record(MessageId::prepare(from, key))
            .is_err()
        {
            tracing::debug!(replica = %self.replica_id, %from, %key, "duplicate Prepare, ignoring");
            return (self, ReplicaOutput::empty());
        }

        if self.abandoned.contains(&key) {
            tracing::debug!(replica = %self.replica_id, %key, "Prepare for abandoned key, ignoring");
            return (self, ReplicaOutput::empty());
        }

        if let Some(pp) = self.pre_prepares.get(&key)
            && prepare.pp_time != pp.pp_time
        {
            let expected = pp.pp_time;
            self.raise_suspicion(
                from,
                SuspicionReason::MismatchedPrepareTime,
                key,
                ObservedValue::Time(prepare.pp_time),
                local_now,
            );
            tracing::warn!(
                replica = %self.replica_id,
                %from,
                %key,
                expected = %expected,
                got = %prepare.pp_time,
                "Prepare with mismatched batch time discarded"
            );
            return (self, ReplicaOutput::empty());
        }

        self.prepares.entry(key).or_default().insert(from, prepare);
        self.try_prepared(key)
    }

    /// Advances to Prepared once `2f` matching Prepares are held.
    fn try_prepared(mut self, key: ThreePhaseKey) -> (Self, ReplicaOutput) {
        if !matches!(
            self.phases.get(&key),
            Some(BatchPhase::TimeChecked(TimeDisposition::Accepted))
        ) {
            return (self, ReplicaOutput::empty());
        }

        let count = self.prepares.get(&key).map_or(0, std::collections::BTreeMap::len);
        if count < self.config.prepare_quorum() {
            return (self, ReplicaOutput::empty());
        }

        self.phases.insert(key, BatchPhase::Prepared);
        self.commits.entry(key).or_default().insert(self.replica_id);
        let _ = self
            .dedup
            .check_and_record(MessageId::commit(self.replica_id, key));

        tracing::debug!(
            replica = %self.replica_id,
            %key,
            prepares = count,
            "Prepare quorum reached, broadcasting Commit"
        );

        let commit = Commit::new(key, self.replica_id);
        let mut output = ReplicaOutput::with_messages(vec![msg_broadcast(
            self.replica_id,
            MessagePayload::Commit(commit),
        )]);

        let (new_self, commit_output) = self.try_committed(key);
        output.merge(commit_output);
        (new_self, output)
    }

    // ========================================================================
    // Commit Handler
    // ========================================================================

    /// Handles a Commit from a peer.
    pub(crate) fn on_commit(
        mut self,
        from: ReplicaId,
        commit: Commit,
        _local_now: Timestamp,
    ) -> (Self, ReplicaOutput) {
        let key = commit.key;

        if key.view != self.view {
            tracing::debug!(replica = %self.replica_id, %key, "Commit from another view, ignoring");
            return (self, ReplicaOutput::empty());
        }

        if from != commit.replica {
            tracing::warn!(
                replica = %self.replica_id,
                %from,
                claimed = %commit.replica,
                "Commit sender does not match envelope, ignoring"
            );
            return (self, ReplicaOutput::empty());
        }

        if self
            .dedup
            .check_and_record(MessageId::commit(from, key))
            .is_err()
        {
            tracing::debug!(replica = %self.replica_id, %from, %key, "duplicate Commit, ignoring");
            return (self, ReplicaOutput::empty());
        }

        if self.abandoned.contains(&key) {
            tracing::debug!(replica = %self.replica_id, %key, "Commit for abandoned key, ignoring");
            return (self, ReplicaOutput::empty());
        }

        self.commits.entry(key).or_default().insert(from);
        self.try_committed(key)
    }

    /// Advances to Committed once `2f + 1` Commits are held.
    ///
    /// Commit counting never waits on the Prepare quorum: a replica still
    /// deferring its own time check commits once enough peers have, and
    /// its pending re-check timer then fires as a no-op.
    fn try_committed(mut self, key: ThreePhaseKey) -> (Self, ReplicaOutput) {
        if matches!(self.phases.get(&key), Some(BatchPhase::Committed)) {
            return (self, ReplicaOutput::empty());
        }
        if self.abandoned.contains(&key) {
            return (self, ReplicaOutput::empty());
        }
        if self.pre_prepares.get(&key).is_none() {
            // Commits can outrun the PrePrepare under reordering; counting
            // resumes once the proposal arrives.
            return (self, ReplicaOutput::empty());
        }

        let count = self.commits.get(&key).map_or(0, std::collections::BTreeSet::len);
        if count < self.config.commit_quorum() {
            return (self, ReplicaOutput::empty());
        }

        self.phases.insert(key, BatchPhase::Committed);
        self.deferred.remove(&key);
        self.apply_queue.insert(key);

        tracing::debug!(
            replica = %self.replica_id,
            %key,
            commits = count,
            "Commit quorum reached"
        );

        self.drain_apply_queue()
    }

    /// Applies committed batches in sequence order.
    ///
    /// Quorums form independently per key, so a later decision may commit
    /// first; it waits here until its predecessor has been applied, keeping
    /// the ledger gapless. A predecessor this replica abandoned leaves a
    /// hole only the state-transfer collaborator can fill.
    fn drain_apply_queue(mut self) -> (Self, ReplicaOutput) {
        let mut output = ReplicaOutput::empty();

        while let Some(&next) = self.apply_queue.first() {
            if next.view != self.view || next.pp_seq_no != self.last_applied.next() {
                tracing::debug!(
                    replica = %self.replica_id,
                    %next,
                    last_applied = %self.last_applied,
                    "holding committed batch until its predecessor is applied"
                );
                break;
            }

            self.apply_queue.remove(&next);
            self.last_applied = next.pp_seq_no;

            let Some(pp) = self.pre_prepares.get(&next) else {
                continue; // committed keys always hold their proposal
            };
            let pp_time = pp.pp_time;
            let ledger_id = pp.ledger_id;
            let txns = pp.txns.clone();

            match self.applier.apply(next, pp_time, ledger_id, txns) {
                Ok(range) => {
                    tracing::info!(
                        replica = %self.replica_id,
                        key = %next,
                        %pp_time,
                        %range,
                        "batch committed"
                    );
                    output.committed.push(CommittedBatch {
                        key: next,
                        pp_time,
                        ledger_id,
                        range,
                    });
                }
                Err(error) => {
                    // Never fatal: the replica keeps ordering even if its
                    // local commit path misbehaves.
                    tracing::error!(
                        replica = %self.replica_id,
                        key = %next,
                        %error,
                        "failed to apply committed batch"
                    );
                }
            }
        }

        (self, output)
    }

    // ========================================================================
    // Suspicion Helper
    // ========================================================================

    fn raise_suspicion(
        &mut self,
        accused: ReplicaId,
        reason: SuspicionReason,
        key: ThreePhaseKey,
        observed: ObservedValue,
        local_now: Timestamp,
    ) {
        self.suspicions.record(SuspicionRecord {
            accused,
            reason,
            key,
            observed,
            raised_at: local_now,
        });
    }
}
