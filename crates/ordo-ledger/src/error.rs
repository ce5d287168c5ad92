//! Ledger error types

use ordo_types::{LedgerId, SeqNo, ThreePhaseKey};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("No ledger registered with id {0}")]
    UnknownLedger(LedgerId),

    #[error("Cannot append an empty transaction batch")]
    EmptyBatch,

    #[error("Cannot commit {requested} staged txns, only {staged} are staged")]
    CommitCountExceedsStaged { requested: u64, staged: u64 },

    #[error("Range starting at {got} does not follow committed history ending at {expected}")]
    SeqNoGap { expected: SeqNo, got: SeqNo },

    #[error("Range starting at {start} overlaps an existing committed range")]
    RangeOverlap { start: SeqNo },

    #[error("Key {0} already tagged to a committed range")]
    DuplicateKey(ThreePhaseKey),
}
