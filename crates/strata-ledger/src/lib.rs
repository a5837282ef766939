//! Strata Ledger: the tamper-evident record everything else writes to.
//!
//! The ledger is a set of independently named, append-only streams. Each entry
//! commits to its payload (`payload_hash`) and to its predecessor
//! (`prev_entry_hash`), so any edit to a committed entry is visible to
//! [`Ledger::verify_chain`].
//!
//! The crate provides:
//! - a pinned canonical JSON form shared by every producer ([`canonical_json`])
//! - per-stream serialized appends with atomic visibility to readers
//! - full-blast-radius chain verification (every divergence, not just the first)
//! - lazy, restartable range reads
//! - a derived lineage index that is rebuilt from the streams whenever it is
//!   found stale
//!
//! A corrupted chain is reported and never repaired here.

#![deny(unsafe_code)]

pub mod canonical;
pub mod digest;
pub mod entry;
pub mod error;
pub mod index;
pub mod ledger;
pub mod range;
mod store;
pub mod verify;

pub use canonical::{canonical_json, hash_payload};
pub use digest::Digest;
pub use entry::{
    canonical_timestamp, streams, validate_stream_name, EntryRef, EventType, LedgerEntry,
    LedgerRecord, GENESIS_PREV_HASH,
};
pub use error::LedgerError;
pub use index::LedgerIndex;
pub use ledger::Ledger;
pub use range::ReadRange;
pub use verify::{ChainIssue, ChainReport, IssueKind};
