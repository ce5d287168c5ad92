//! # ordo-ledger: Ledger commit path for `Ordo`
//!
//! This crate owns everything downstream of an ordering decision:
//!
//! - [`LedgerStore`] - the seam to the external ledger storage collaborator
//! - [`InMemoryLedger`] - reference store with optimistic staging
//! - [`SeqRangeIndex`] - committed sequence ranges mapped to the
//!   [`ThreePhaseKey`](ordo_types::ThreePhaseKey) that produced them
//! - [`CommitApplier`] - applies a committed batch exactly once per key
//!
//! The index and the ledgers are owned exclusively by the applier; no other
//! component mutates them.

mod applier;
mod error;
mod ledger;
mod seq_range;

pub use applier::CommitApplier;
pub use error::LedgerError;
pub use ledger::{InMemoryLedger, LedgerStore};
pub use seq_range::SeqRangeIndex;
