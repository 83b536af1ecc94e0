//! # Persistent Storage
//!
//! Disk-backed implementations of `LedgerStore`.

mod redb_ledger;

pub use redb_ledger::RedbLedger;
