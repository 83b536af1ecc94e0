//! # Gateway Primitives
//!
//! Hardcoded defaults and limits for the PisoWiFi ledger.
//!
//! These are compiled into the binary. Anything an operator is expected to
//! tune (tariff, poll interval) has a config field that defaults to the
//! value here.

/// Seconds in one minute of purchased access.
pub const SECONDS_PER_MINUTE: u64 = 60;

/// Default tariff: one peso buys one minute.
pub const DEFAULT_MINUTES_PER_PESO: u64 = 1;

/// Default metering interval.
///
/// Each tick charges connected clients this many seconds, so the interval
/// is also the charging granularity.
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 30;

/// Pause after a tick that could not poll the device list.
pub const DEFAULT_ERROR_BACKOFF_SECS: u64 = 1;

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Largest single top-up accepted, in pesos.
///
/// Coin acceptors never produce more than a few hundred at once; anything
/// above this is a typo or a forged request.
pub const MAX_TOPUP_AMOUNT: u64 = 10_000;

/// Maximum number of transaction or deduction rows returned per query.
///
/// The newest rows are kept when a history is truncated.
pub const MAX_HISTORY_ROWS: usize = 1000;
