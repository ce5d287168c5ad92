//! Ledger store seam and the in-memory reference implementation.
//!
//! The ordering core only ever touches a ledger through [`LedgerStore`]:
//! append a batch stamped with its commit time, read a record back by
//! sequence number. Persistence, Merkle trees and proofs live behind this
//! seam in the external storage collaborator.
//!
//! [`InMemoryLedger`] additionally exposes the optimistic staging interface:
//! transactions of an in-flight batch are stamped and staged while the
//! three-phase exchange is running, then committed (or discarded, on a
//! failed batch) in one step. Every transaction of a batch carries the same
//! commit time, because the whole batch belongs to one PRE-PREPARE.

use ordo_types::{SeqNo, SeqNoRange, Timestamp, Txn};

use crate::LedgerError;

// ============================================================================
// Store Seam
// ============================================================================

/// Interface the commit applier requires from a ledger.
///
/// # Contract
///
/// - `append` assigns contiguous, one-indexed sequence numbers and stamps
///   every record with `commit_time`.
/// - `get_by_seq_no(n).txn_time()` equals the `commit_time` passed to the
///   `append` call that produced `n`. The ordering core relies on this as a
///   correctness contract, not an implementation detail.
pub trait LedgerStore {
    /// Appends a batch, stamping each record with `commit_time`.
    ///
    /// Returns the inclusive range of sequence numbers assigned to the batch.
    fn append(
        &mut self,
        txns: Vec<Txn>,
        commit_time: Timestamp,
    ) -> Result<SeqNoRange, LedgerError>;

    /// Returns the committed record with the given sequence number.
    fn get_by_seq_no(&self, seq_no: SeqNo) -> Option<&Txn>;

    /// Number of committed transactions.
    fn size(&self) -> u64;
}

// ============================================================================
// In-Memory Ledger
// ============================================================================

/// In-memory ledger with optimistic staging.
///
/// Committed records are stored in order; record `i` (zero-based) holds
/// sequence number `i + 1`. Staged records sit in a separate tail that can
/// be committed in prefix order or discarded from the back.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    committed: Vec<Txn>,
    staged: Vec<Txn>,
}

impl InMemoryLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed plus staged transactions.
    pub fn staged_size(&self) -> u64 {
        self.committed.len() as u64 + self.staged.len() as u64
    }

    /// Number of staged (not yet committed) transactions.
    pub fn staged_count(&self) -> u64 {
        self.staged.len() as u64
    }

    /// Stamps batch metadata onto `txns` before staging.
    ///
    /// All transactions receive the same `txn_time` since they belong to the
    /// same batch, plus provisional sequence numbers continuing after the
    /// current staged tail.
    pub fn stamp_batch(&self, txns: &mut [Txn], txn_time: Timestamp) {
        let mut seq_no = SeqNo::new(self.staged_size());
        for txn in txns {
            seq_no = seq_no.next();
            txn.set_seq_no(seq_no);
            txn.set_txn_time(txn_time);
        }
    }

    /// Stages a stamped batch without committing it.
    ///
    /// Returns the provisional sequence range the batch occupies.
    ///
    /// # Panics
    ///
    /// Debug builds panic if any transaction is missing its stamped
    /// sequence number (must call [`Self::stamp_batch`] first).
    pub fn stage(&mut self, txns: Vec<Txn>) -> Result<SeqNoRange, LedgerError> {
        if txns.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }
        debug_assert!(
            txns.iter().all(|txn| txn.seq_no().is_some()),
            "staged txns must carry stamped sequence numbers"
        );

        let start = SeqNo::new(self.staged_size() + 1);
        let end = SeqNo::new(self.staged_size() + txns.len() as u64);
        self.staged.extend(txns);
        Ok(SeqNoRange::new(start, end))
    }

    /// Commits the first `count` staged transactions.
    ///
    /// Returns the inclusive range of sequence numbers they now occupy, or
    /// `None` when `count` is zero.
    pub fn commit_staged(&mut self, count: u64) -> Result<Option<SeqNoRange>, LedgerError> {
        if count > self.staged.len() as u64 {
            return Err(LedgerError::CommitCountExceedsStaged {
                requested: count,
                staged: self.staged.len() as u64,
            });
        }
        if count == 0 {
            return Ok(None);
        }

        let start = SeqNo::new(self.committed.len() as u64 + 1);
        let committed: Vec<Txn> = self.staged.drain(..count as usize).collect();
        self.committed.extend(committed);
        let end = SeqNo::new(self.committed.len() as u64);

        tracing::debug!(
            committed = count,
            staged = self.staged.len(),
            "committed staged txns"
        );
        Ok(Some(SeqNoRange::new(start, end)))
    }

    /// Discards the last `count` staged transactions (a failed batch is
    /// always the most recently staged one).
    pub fn discard_staged(&mut self, count: u64) {
        if count == 0 {
            return;
        }
        let keep = self.staged.len().saturating_sub(count as usize);
        self.staged.truncate(keep);
        tracing::info!(
            discarded = count,
            staged = self.staged.len(),
            "discarded staged txns"
        );
    }

    /// Drops all staged transactions.
    pub fn reset_staged(&mut self) {
        self.staged.clear();
    }
}

impl LedgerStore for InMemoryLedger {
    fn append(
        &mut self,
        mut txns: Vec<Txn>,
        commit_time: Timestamp,
    ) -> Result<SeqNoRange, LedgerError> {
        if txns.is_empty() {
            return Err(LedgerError::EmptyBatch);
        }
        // Appends go through the staging path so that direct appends and
        // staged commits assign sequence numbers identically.
        self.stamp_batch(&mut txns, commit_time);
        let count = txns.len() as u64;
        self.stage(txns)?;
        let range = self
            .commit_staged(count)?
            .expect("non-empty batch yields a range");
        Ok(range)
    }

    fn get_by_seq_no(&self, seq_no: SeqNo) -> Option<&Txn> {
        if seq_no == SeqNo::ZERO {
            return None;
        }
        self.committed.get(seq_no.as_u64() as usize - 1)
    }

    fn size(&self) -> u64 {
        self.committed.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn batch(n: usize) -> Vec<Txn> {
        (0..n)
            .map(|i| Txn::new(Bytes::from(format!("txn-{i}"))))
            .collect()
    }

    #[test]
    fn append_assigns_contiguous_seq_nos() {
        let mut ledger = InMemoryLedger::new();
        let t = Timestamp::from_secs(10);

        let first = ledger.append(batch(2), t).expect("append");
        assert_eq!(first, SeqNoRange::new(SeqNo::new(1), SeqNo::new(2)));

        let second = ledger.append(batch(3), t).expect("append");
        assert_eq!(second, SeqNoRange::new(SeqNo::new(3), SeqNo::new(5)));
        assert_eq!(ledger.size(), 5);
    }

    #[test]
    fn append_stamps_batch_commit_time() {
        let mut ledger = InMemoryLedger::new();
        let t = Timestamp::from_secs(77);
        let range = ledger.append(batch(3), t).expect("append");

        for seq_no in range.iter() {
            let txn = ledger.get_by_seq_no(seq_no).expect("committed txn");
            assert_eq!(txn.txn_time(), Some(t));
            assert_eq!(txn.seq_no(), Some(seq_no));
        }
    }

    #[test]
    fn append_rejects_empty_batch() {
        let mut ledger = InMemoryLedger::new();
        let err = ledger.append(vec![], Timestamp::EPOCH).unwrap_err();
        assert_eq!(err, LedgerError::EmptyBatch);
    }

    #[test]
    fn get_by_seq_no_zero_is_none() {
        let mut ledger = InMemoryLedger::new();
        ledger
            .append(batch(1), Timestamp::from_secs(1))
            .expect("append");
        assert!(ledger.get_by_seq_no(SeqNo::ZERO).is_none());
        assert!(ledger.get_by_seq_no(SeqNo::new(2)).is_none());
    }

    #[test]
    fn staged_txns_commit_in_prefix_order() {
        let mut ledger = InMemoryLedger::new();
        let t = Timestamp::from_secs(5);

        let mut first = batch(2);
        ledger.stamp_batch(&mut first, t);
        ledger.stage(first).expect("stage");

        let mut second = batch(2);
        ledger.stamp_batch(&mut second, t);
        ledger.stage(second).expect("stage");

        assert_eq!(ledger.staged_size(), 4);
        assert_eq!(ledger.size(), 0);

        let range = ledger.commit_staged(2).expect("commit").expect("range");
        assert_eq!(range, SeqNoRange::new(SeqNo::new(1), SeqNo::new(2)));
        assert_eq!(ledger.size(), 2);
        assert_eq!(ledger.staged_count(), 2);
    }

    #[test]
    fn commit_staged_zero_is_noop() {
        let mut ledger = InMemoryLedger::new();
        assert_eq!(ledger.commit_staged(0).expect("commit"), None);
    }

    #[test]
    fn commit_staged_beyond_staged_fails() {
        let mut ledger = InMemoryLedger::new();
        let err = ledger.commit_staged(1).unwrap_err();
        assert_eq!(
            err,
            LedgerError::CommitCountExceedsStaged {
                requested: 1,
                staged: 0
            }
        );
    }

    #[test]
    fn discard_drops_most_recent_staged() {
        let mut ledger = InMemoryLedger::new();
        let t = Timestamp::from_secs(5);

        let mut txns = batch(3);
        ledger.stamp_batch(&mut txns, t);
        let kept = txns[0].clone();
        ledger.stage(txns).expect("stage");

        ledger.discard_staged(2);
        assert_eq!(ledger.staged_count(), 1);

        // The surviving staged txn is the first one staged.
        let range = ledger.commit_staged(1).expect("commit").expect("range");
        assert_eq!(range.len(), 1);
        assert_eq!(ledger.get_by_seq_no(range.start()), Some(&kept));
    }

    #[test]
    fn reset_staged_clears_tail_only() {
        let mut ledger = InMemoryLedger::new();
        let t = Timestamp::from_secs(5);
        ledger.append(batch(2), t).expect("append");

        let mut txns = batch(2);
        ledger.stamp_batch(&mut txns, t);
        ledger.stage(txns).expect("stage");

        ledger.reset_staged();
        assert_eq!(ledger.staged_count(), 0);
        assert_eq!(ledger.size(), 2);
    }

    #[test]
    fn provisional_seq_nos_continue_after_staged_tail() {
        let ledger = {
            let mut ledger = InMemoryLedger::new();
            let mut txns = batch(2);
            ledger.stamp_batch(&mut txns, Timestamp::from_secs(1));
            ledger.stage(txns).expect("stage");
            ledger
        };

        let mut next = batch(2);
        ledger.stamp_batch(&mut next, Timestamp::from_secs(2));
        assert_eq!(next[0].seq_no(), Some(SeqNo::new(3)));
        assert_eq!(next[1].seq_no(), Some(SeqNo::new(4)));
    }
}
