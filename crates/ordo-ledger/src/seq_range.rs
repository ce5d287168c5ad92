//! Committed sequence ranges mapped to the ordering decision that produced them.
//!
//! The [`SeqRangeIndex`] answers two audit questions in O(log n):
//! which three-phase key committed sequence number `n`, and which range did
//! a given key commit. Ranges are kept in a map ordered by start sequence
//! number; lookup takes the greatest start at or below `n` and checks the
//! range end.
//!
//! # Invariants
//!
//! These invariants are enforced on insert and verified with debug assertions:
//!
//! - Ranges never overlap.
//! - Once the index is non-empty, ranges are contiguous and gapless: each
//!   new range starts exactly one past the previous end.
//! - Each key tags at most one range.

use std::collections::{BTreeMap, HashMap};

use ordo_types::{SeqNo, SeqNoRange, ThreePhaseKey};

use crate::LedgerError;

/// Ordered, non-overlapping committed ranges tagged with three-phase keys.
#[derive(Debug, Clone, Default)]
pub struct SeqRangeIndex {
    /// Range start -> (range end, producing key).
    by_start: BTreeMap<SeqNo, (SeqNo, ThreePhaseKey)>,

    /// Producing key -> committed range.
    by_key: HashMap<ThreePhaseKey, SeqNoRange>,
}

impl SeqRangeIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed ranges.
    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }

    /// The highest committed sequence number, if any range is present.
    pub fn last_committed(&self) -> Option<SeqNo> {
        self.by_start.values().next_back().map(|(end, _)| *end)
    }

    /// Inserts a committed range tagged with the key that produced it.
    ///
    /// The range must continue committed history without gap or overlap,
    /// and the key must not already tag a range.
    pub fn insert(&mut self, range: SeqNoRange, key: ThreePhaseKey) -> Result<(), LedgerError> {
        if self.by_key.contains_key(&key) {
            return Err(LedgerError::DuplicateKey(key));
        }

        match self.last_committed() {
            Some(last) => {
                let expected = last.next();
                if range.start() < expected {
                    return Err(LedgerError::RangeOverlap {
                        start: range.start(),
                    });
                }
                if range.start() > expected {
                    return Err(LedgerError::SeqNoGap {
                        expected,
                        got: range.start(),
                    });
                }
            }
            None => {
                if range.start() != SeqNo::new(1) {
                    return Err(LedgerError::SeqNoGap {
                        expected: SeqNo::new(1),
                        got: range.start(),
                    });
                }
            }
        }

        self.by_start.insert(range.start(), (range.end(), key));
        self.by_key.insert(key, range);

        debug_assert_eq!(
            self.by_start.len(),
            self.by_key.len(),
            "start map and key map must stay in sync"
        );
        Ok(())
    }

    /// Returns the key whose committed range covers `seq_no`.
    pub fn key_for(&self, seq_no: SeqNo) -> Option<ThreePhaseKey> {
        let (_, (end, key)) = self.by_start.range(..=seq_no).next_back()?;
        (seq_no <= *end).then_some(*key)
    }

    /// Returns the range committed by `key`, if any.
    pub fn range_for(&self, key: ThreePhaseKey) -> Option<SeqNoRange> {
        self.by_key.get(&key).copied()
    }

    /// Returns true if `key` already tags a committed range.
    pub fn contains_key(&self, key: ThreePhaseKey) -> bool {
        self.by_key.contains_key(&key)
    }

    /// Iterates committed ranges in sequence order.
    pub fn ranges(&self) -> impl Iterator<Item = (SeqNoRange, ThreePhaseKey)> + '_ {
        self.by_start
            .iter()
            .map(|(start, (end, key))| (SeqNoRange::new(*start, *end), *key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ordo_types::{PpSeqNo, ViewNumber};

    fn key(view: u64, seq: u64) -> ThreePhaseKey {
        ThreePhaseKey::new(ViewNumber::new(view), PpSeqNo::new(seq))
    }

    fn range(start: u64, end: u64) -> SeqNoRange {
        SeqNoRange::new(SeqNo::new(start), SeqNo::new(end))
    }

    #[test]
    fn first_range_must_start_at_one() {
        let mut index = SeqRangeIndex::new();
        let err = index.insert(range(2, 3), key(0, 1)).unwrap_err();
        assert_eq!(
            err,
            LedgerError::SeqNoGap {
                expected: SeqNo::new(1),
                got: SeqNo::new(2)
            }
        );
        assert!(index.insert(range(1, 3), key(0, 1)).is_ok());
    }

    #[test]
    fn ranges_stay_contiguous() {
        let mut index = SeqRangeIndex::new();
        index.insert(range(1, 2), key(0, 1)).expect("insert");

        let gap = index.insert(range(4, 5), key(0, 2)).unwrap_err();
        assert_eq!(
            gap,
            LedgerError::SeqNoGap {
                expected: SeqNo::new(3),
                got: SeqNo::new(4)
            }
        );

        let overlap = index.insert(range(2, 5), key(0, 2)).unwrap_err();
        assert_eq!(
            overlap,
            LedgerError::RangeOverlap {
                start: SeqNo::new(2)
            }
        );

        index.insert(range(3, 5), key(0, 2)).expect("insert");
        assert_eq!(index.last_committed(), Some(SeqNo::new(5)));
    }

    #[test]
    fn duplicate_key_rejected() {
        let mut index = SeqRangeIndex::new();
        index.insert(range(1, 2), key(0, 1)).expect("insert");
        let err = index.insert(range(3, 4), key(0, 1)).unwrap_err();
        assert_eq!(err, LedgerError::DuplicateKey(key(0, 1)));
    }

    #[test]
    fn key_for_resolves_every_covered_seq_no() {
        let mut index = SeqRangeIndex::new();
        index.insert(range(1, 2), key(0, 1)).expect("insert");
        index.insert(range(3, 3), key(0, 2)).expect("insert");
        index.insert(range(4, 7), key(1, 1)).expect("insert");

        assert_eq!(index.key_for(SeqNo::new(1)), Some(key(0, 1)));
        assert_eq!(index.key_for(SeqNo::new(2)), Some(key(0, 1)));
        assert_eq!(index.key_for(SeqNo::new(3)), Some(key(0, 2)));
        assert_eq!(index.key_for(SeqNo::new(5)), Some(key(1, 1)));
        assert_eq!(index.key_for(SeqNo::new(8)), None);
        assert_eq!(index.key_for(SeqNo::ZERO), None);
    }

    #[test]
    fn range_for_round_trips() {
        let mut index = SeqRangeIndex::new();
        index.insert(range(1, 4), key(0, 1)).expect("insert");
        assert_eq!(index.range_for(key(0, 1)), Some(range(1, 4)));
        assert_eq!(index.range_for(key(0, 2)), None);
        assert!(index.contains_key(key(0, 1)));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Every sequence number maps to exactly one key after a run of
            /// contiguous batch inserts.
            #[test]
            fn seq_nos_map_to_exactly_one_key(batch_sizes in proptest::collection::vec(1u64..10, 1..20)) {
                let mut index = SeqRangeIndex::new();
                let mut next_start = 1u64;
                for (i, size) in batch_sizes.iter().enumerate() {
                    let r = range(next_start, next_start + size - 1);
                    index.insert(r, key(0, i as u64 + 1)).expect("contiguous insert");
                    next_start += size;
                }

                for seq in 1..next_start {
                    let covering = index.key_for(SeqNo::new(seq)).expect("covered");
                    let r = index.range_for(covering).expect("tagged range");
                    prop_assert!(r.contains(SeqNo::new(seq)));
                }
                prop_assert_eq!(index.key_for(SeqNo::new(next_start)), None);
            }
        }
    }
}
