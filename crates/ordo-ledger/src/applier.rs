//! Applies committed batches to ledgers, at most once per key.
//!
//! The applier is the single owner of the ledgers and their range indexes.
//! When the ordering state machine reaches commit quorum for a key it hands
//! the batch here; the applier appends the transactions stamped with the
//! batch's PRE-PREPARE time and records the resulting sequence range under
//! the key. A second apply for the same key is a benign no-op (duplicate
//! message delivery must be tolerated), logged but never a suspicion.

use std::collections::HashMap;

use ordo_types::{LedgerId, SeqNo, SeqNoRange, ThreePhaseKey, Timestamp, Txn};

use crate::{LedgerError, LedgerStore, SeqRangeIndex};

/// Owns the ledgers and applies ordering decisions to them.
///
/// Cloneable (given a cloneable store) so that a replica owning an applier
/// can be snapshotted in simulation tests.
#[derive(Debug, Clone)]
pub struct CommitApplier<L> {
    ledgers: HashMap<LedgerId, Entry<L>>,
}

#[derive(Debug, Clone)]
struct Entry<L> {
    store: L,
    index: SeqRangeIndex,
}

impl<L> Default for CommitApplier<L> {
    fn default() -> Self {
        Self {
            ledgers: HashMap::new(),
        }
    }
}

impl<L: LedgerStore> CommitApplier<L> {
    /// Creates an applier with no ledgers registered.
    pub fn new() -> Self {
        Self {
            ledgers: HashMap::new(),
        }
    }

    /// Registers a ledger under `ledger_id`, replacing any previous one.
    pub fn register_ledger(&mut self, ledger_id: LedgerId, store: L) {
        self.ledgers.insert(
            ledger_id,
            Entry {
                store,
                index: SeqRangeIndex::new(),
            },
        );
    }

    /// Applies a committed batch to the named ledger.
    ///
    /// Appends `txns` with every record stamped `pp_time`, then tags the
    /// returned sequence range with `key`. Idempotent per key: a duplicate
    /// call returns the range committed the first time without touching the
    /// ledger.
    pub fn apply(
        &mut self,
        key: ThreePhaseKey,
        pp_time: Timestamp,
        ledger_id: LedgerId,
        txns: Vec<Txn>,
    ) -> Result<SeqNoRange, LedgerError> {
        let entry = self
            .ledgers
            .get_mut(&ledger_id)
            .ok_or(LedgerError::UnknownLedger(ledger_id))?;

        if let Some(existing) = entry.index.range_for(key) {
            tracing::debug!(
                %key,
                %ledger_id,
                range = %existing,
                "duplicate apply for already-committed key, ignoring"
            );
            return Ok(existing);
        }

        let range = entry.store.append(txns, pp_time)?;
        entry.index.insert(range, key)?;

        tracing::debug!(%key, %ledger_id, range = %range, "applied committed batch");
        Ok(range)
    }

    /// The range index for a ledger.
    pub fn index(&self, ledger_id: LedgerId) -> Option<&SeqRangeIndex> {
        self.ledgers.get(&ledger_id).map(|entry| &entry.index)
    }

    /// Read access to a registered ledger.
    pub fn ledger(&self, ledger_id: LedgerId) -> Option<&L> {
        self.ledgers.get(&ledger_id).map(|entry| &entry.store)
    }

    /// The key that committed `seq_no` on the named ledger.
    pub fn key_for(&self, ledger_id: LedgerId, seq_no: SeqNo) -> Option<ThreePhaseKey> {
        self.index(ledger_id)?.key_for(seq_no)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryLedger;
    use bytes::Bytes;
    use ordo_types::{PpSeqNo, ViewNumber};

    fn key(view: u64, seq: u64) -> ThreePhaseKey {
        ThreePhaseKey::new(ViewNumber::new(view), PpSeqNo::new(seq))
    }

    fn batch(n: usize) -> Vec<Txn> {
        (0..n)
            .map(|i| Txn::new(Bytes::from(format!("txn-{i}"))))
            .collect()
    }

    fn applier() -> CommitApplier<InMemoryLedger> {
        let mut applier = CommitApplier::new();
        applier.register_ledger(LedgerId::DOMAIN, InMemoryLedger::new());
        applier
    }

    #[test]
    fn apply_commits_and_indexes_range() {
        let mut applier = applier();
        let t = Timestamp::from_secs(9);

        let range = applier
            .apply(key(0, 1), t, LedgerId::DOMAIN, batch(3))
            .expect("apply");
        assert_eq!(range, SeqNoRange::new(SeqNo::new(1), SeqNo::new(3)));

        let index = applier.index(LedgerId::DOMAIN).expect("index");
        assert_eq!(index.key_for(SeqNo::new(2)), Some(key(0, 1)));

        // Every committed record carries the batch's pp_time.
        let ledger = applier.ledger(LedgerId::DOMAIN).expect("ledger");
        for seq_no in range.iter() {
            assert_eq!(
                ledger.get_by_seq_no(seq_no).expect("record").txn_time(),
                Some(t)
            );
        }
    }

    #[test]
    fn duplicate_apply_is_noop() {
        let mut applier = applier();
        let t = Timestamp::from_secs(9);

        let first = applier
            .apply(key(0, 1), t, LedgerId::DOMAIN, batch(2))
            .expect("apply");
        let second = applier
            .apply(key(0, 1), t, LedgerId::DOMAIN, batch(2))
            .expect("duplicate apply");

        assert_eq!(first, second);
        assert_eq!(applier.ledger(LedgerId::DOMAIN).expect("ledger").size(), 2);
        assert_eq!(applier.index(LedgerId::DOMAIN).expect("index").len(), 1);
    }

    #[test]
    fn apply_unknown_ledger_fails() {
        let mut applier: CommitApplier<InMemoryLedger> = CommitApplier::new();
        let err = applier
            .apply(key(0, 1), Timestamp::EPOCH, LedgerId::DOMAIN, batch(1))
            .unwrap_err();
        assert_eq!(err, LedgerError::UnknownLedger(LedgerId::DOMAIN));
    }

    #[test]
    fn successive_keys_extend_history() {
        let mut applier = applier();
        let t = Timestamp::from_secs(9);

        applier
            .apply(key(0, 1), t, LedgerId::DOMAIN, batch(2))
            .expect("apply");
        let range = applier
            .apply(key(0, 2), t.saturating_add_nanos(1), LedgerId::DOMAIN, batch(2))
            .expect("apply");

        assert_eq!(range, SeqNoRange::new(SeqNo::new(3), SeqNo::new(4)));
        assert_eq!(
            applier.key_for(LedgerId::DOMAIN, SeqNo::new(4)),
            Some(key(0, 2))
        );
    }
}
