//! # Core Type Definitions
//!
//! This module contains all core types for the PisoWiFi ledger:
//! - Hardware and ledger identifiers (`MacAddress`, `ClientId`)
//! - Time accounting (`Balance`, `Timestamp`)
//! - Ledger rows (`Client`, `Transaction`, `Deduction`)
//! - Error types (`PisoError`)
//!
//! ## Integer Time
//!
//! All types in this module:
//! - Use whole seconds, never fractional minutes
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Use saturating arithmetic so a balance can never underflow

use crate::primitives::SECONDS_PER_MINUTE;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// MAC ADDRESS
// =============================================================================

/// A 48-bit hardware address identifying a wireless client.
///
/// Parsed from `AA:BB:CC:DD:EE:FF` or `aa-bb-cc-dd-ee-ff` and always
/// displayed in upper-case colon form, which is also the form handed to
/// `iptables --mac-source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// Create a MAC address from raw octets.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Get the raw octets.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Pack the address into the low 48 bits of a `u64` (storage key).
    #[must_use]
    pub fn to_u64(&self) -> u64 {
        self.0
            .iter()
            .fold(0u64, |acc, &octet| (acc << 8) | u64::from(octet))
    }

    /// Unpack an address from the low 48 bits of a `u64`.
    #[must_use]
    pub fn from_u64(key: u64) -> Self {
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = (key >> (8 * (5 - i))) as u8;
        }
        Self(octets)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for MacAddress {
    type Err = PisoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || PisoError::InvalidMacAddress(s.to_string());

        let trimmed = s.trim();
        let groups: Vec<&str> = trimmed.split(|c: char| c == ':' || c == '-').collect();
        if groups.len() != 6 {
            return Err(invalid());
        }

        let mut octets = [0u8; 6];
        for (octet, group) in octets.iter_mut().zip(groups) {
            if group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(group, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// LEDGER IDENTIFIERS & TIME
// =============================================================================

/// Ledger row identifier for a client. Allocated monotonically from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u64);

/// Unix time in whole seconds, supplied by the caller.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub u64);

/// Remaining access time in whole seconds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Balance(pub u64);

impl Balance {
    /// An exhausted balance.
    pub const ZERO: Self = Self(0);

    /// Create a balance from whole minutes (saturating).
    #[must_use]
    pub const fn from_minutes(minutes: u64) -> Self {
        Self(minutes.saturating_mul(SECONDS_PER_MINUTE))
    }

    /// Remaining seconds.
    #[must_use]
    pub const fn seconds(self) -> u64 {
        self.0
    }

    /// Remaining whole minutes (rounded down).
    #[must_use]
    pub const fn minutes(self) -> u64 {
        self.0 / SECONDS_PER_MINUTE
    }

    /// True when no access time is left.
    #[must_use]
    pub const fn is_exhausted(self) -> bool {
        self.0 == 0
    }

    /// Add seconds, saturating at `u64::MAX`.
    #[must_use]
    pub const fn credit(self, seconds: u64) -> Self {
        Self(self.0.saturating_add(seconds))
    }

    /// Take up to `seconds`, never going below zero.
    ///
    /// Returns the remaining balance and the seconds actually taken.
    #[must_use]
    pub const fn debit(self, seconds: u64) -> (Self, u64) {
        let taken = if seconds < self.0 { seconds } else { self.0 };
        (Self(self.0 - taken), taken)
    }
}

// =============================================================================
// ACCESS STATUS
// =============================================================================

/// Firewall state of a client as last confirmed by the gateway.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum AccessStatus {
    /// Known to the ledger but never granted or blocked.
    #[default]
    Inactive,
    /// Forwarding allowed.
    Active,
    /// A DROP rule is installed for this MAC.
    Blocked,
}

impl AccessStatus {
    /// Lower-case name used in logs and JSON.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Blocked => "blocked",
        }
    }
}

impl fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// LEDGER ROWS
// =============================================================================

/// One row per client hardware address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub mac: MacAddress,
    pub balance: Balance,
    pub status: AccessStatus,
    /// Lifetime pesos paid. Kept on the row because the logs are capped.
    pub total_amount: u64,
    /// Lifetime minutes bought.
    pub total_minutes: u64,
    /// Lifetime seconds taken by the meter.
    pub total_seconds_used: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Client {
    /// Create a fresh client row with an empty balance.
    #[must_use]
    pub fn new(id: ClientId, mac: MacAddress, at: Timestamp) -> Self {
        Self {
            id,
            mac,
            balance: Balance::ZERO,
            status: AccessStatus::Inactive,
            total_amount: 0,
            total_minutes: 0,
            total_seconds_used: 0,
            created_at: at,
            updated_at: at,
        }
    }

    /// Apply a top-up to the balance and lifetime totals.
    pub(crate) fn record_top_up(&mut self, amount: u64, minutes: u64, seconds: u64, at: Timestamp) {
        self.balance = self.balance.credit(seconds);
        self.total_amount = self.total_amount.saturating_add(amount);
        self.total_minutes = self.total_minutes.saturating_add(minutes);
        self.updated_at = at;
    }

    /// Take up to `seconds` from the balance. Returns the amount taken.
    pub(crate) fn record_usage(&mut self, seconds: u64, at: Timestamp) -> u64 {
        let (remaining, taken) = self.balance.debit(seconds);
        if taken > 0 {
            self.balance = remaining;
            self.total_seconds_used = self.total_seconds_used.saturating_add(taken);
            self.updated_at = at;
        }
        taken
    }
}

/// A top-up: `amount` coins bought `minutes` of access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: u64,
    pub client_id: ClientId,
    pub mac: MacAddress,
    pub amount: u64,
    pub minutes: u64,
    pub at: Timestamp,
}

/// Time taken from a balance by the meter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub id: u64,
    pub client_id: ClientId,
    pub mac: MacAddress,
    pub seconds: u64,
    pub at: Timestamp,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur anywhere in the gateway.
///
/// - No silent failures
/// - Use `Result<T, PisoError>` for fallible operations
/// - Ledger operations never panic; all errors are recoverable
#[derive(Debug, Error)]
pub enum PisoError {
    /// The string is not a six-group hexadecimal hardware address.
    #[error("Invalid MAC address: {0}")]
    InvalidMacAddress(String),

    /// A top-up amount or credited duration was rejected.
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// No ledger row exists for this hardware address.
    #[error("Client not found: {0}")]
    ClientNotFound(MacAddress),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),

    /// An external command (iptables, iw, arp) failed or timed out.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The configuration file or environment is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The ledger database is held open by another process.
    #[error("Ledger is in use by another process: {0}")]
    LedgerBusy(String),

    /// A running gateway answered a remote request with an error status.
    #[error("Gateway returned {0}: {1}")]
    GatewayError(u16, String),
}

// =============================================================================
// TESTS
// =============================================================================
