//! # pisowifi-core
//!
//! The prepaid time ledger for PisoWiFi - THE LEDGER.
//!
//! This crate holds every decision the gateway makes about a client:
//! how much time a coin buys, how much time is left, and whether the
//! client should be forwarding, charged, or blocked.
//!
//! ## Architectural Constraints
//!
//! The core:
//! - Never touches the network or spawns processes (the app does)
//! - Never reads a clock; timestamps are passed in
//! - Counts time in whole seconds (no floating point)
//! - Has NO async dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod access;
pub mod ledger;
pub mod primitives;
pub mod storage;
pub mod store;
pub mod summary;
pub mod tariff;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AccessStatus, Balance, Client, ClientId, Deduction, MacAddress, PisoError, Timestamp,
    Transaction,
};

// =============================================================================
// RE-EXPORTS: Ledger
// =============================================================================

pub use access::{AccessAction, decide};
pub use ledger::{ClientHistory, Ledger, LedgerBackend};
pub use storage::RedbLedger;
pub use store::{LedgerStore, MemoryLedger};
pub use summary::LedgerSummary;
pub use tariff::Tariff;
