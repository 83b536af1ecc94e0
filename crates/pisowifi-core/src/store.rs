//! # Ledger Store
//!
//! The balance ledger for PisoWiFi.
//!
//! This module defines the `LedgerStore` trait and its in-memory
//! implementation. All data structures use `BTreeMap` so listings come back
//! in a stable order.

use crate::primitives::{MAX_HISTORY_ROWS, SECONDS_PER_MINUTE};
use crate::{
    AccessStatus, Balance, Client, ClientId, Deduction, MacAddress, PisoError, Timestamp,
    Transaction,
};
use std::collections::BTreeMap;

// =============================================================================
// LEDGERSTORE TRAIT
// =============================================================================

/// The LedgerStore trait defines the balance ledger operations.
///
/// Every write is all-or-nothing: a failed call leaves balances, statuses
/// and logs exactly as they were.
pub trait LedgerStore {
    /// Credit `minutes` bought for `amount` pesos to `mac` and log the
    /// transaction. Creates the client row on first top-up.
    ///
    /// # Errors
    ///
    /// Returns `PisoError::InvalidAmount` if `minutes` is zero.
    fn add_time(
        &mut self,
        mac: MacAddress,
        amount: u64,
        minutes: u64,
        at: Timestamp,
    ) -> Result<Client, PisoError>;

    /// Current balance. Unknown addresses have a zero balance.
    fn check_balance(&self, mac: MacAddress) -> Result<Balance, PisoError>;

    /// Take up to `seconds` from the balance and log what was taken.
    ///
    /// Returns `None` for unknown addresses (nothing is written), otherwise
    /// the remaining balance.
    fn deduct_time(
        &mut self,
        mac: MacAddress,
        seconds: u64,
        at: Timestamp,
    ) -> Result<Option<Balance>, PisoError>;

    /// Record the firewall status confirmed for `mac`, creating an empty
    /// client row if needed.
    fn set_status(
        &mut self,
        mac: MacAddress,
        status: AccessStatus,
        at: Timestamp,
    ) -> Result<Client, PisoError>;

    /// Look up a client row.
    fn client(&self, mac: MacAddress) -> Result<Option<Client>, PisoError>;

    /// All client rows, ordered by id.
    fn clients(&self) -> Result<Vec<Client>, PisoError>;

    /// Top-ups for `mac`, oldest first, at most `MAX_HISTORY_ROWS`.
    fn transactions(&self, mac: MacAddress) -> Result<Vec<Transaction>, PisoError>;

    /// Deductions for `mac`, oldest first, at most `MAX_HISTORY_ROWS`.
    fn deductions(&self, mac: MacAddress) -> Result<Vec<Deduction>, PisoError>;
}

/// Reject top-ups that would not add any time.
pub(crate) fn validate_credit(minutes: u64) -> Result<u64, PisoError> {
    if minutes == 0 {
        return Err(PisoError::InvalidAmount(
            "credited minutes must be at least 1".to_string(),
        ));
    }
    Ok(minutes.saturating_mul(SECONDS_PER_MINUTE))
}

/// Keep only the newest `MAX_HISTORY_ROWS` entries.
pub(crate) fn truncate_history<T>(mut rows: Vec<T>) -> Vec<T> {
    if rows.len() > MAX_HISTORY_ROWS {
        rows.drain(..rows.len() - MAX_HISTORY_ROWS);
    }
    rows
}

// =============================================================================
// MEMORY LEDGER
// =============================================================================

/// In-memory ledger.
///
/// Used for development mode and tests. Everything is lost on drop.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    /// Client rows: ClientId -> Client
    clients: BTreeMap<ClientId, Client>,

    /// Reverse lookup: MacAddress -> ClientId
    mac_index: BTreeMap<MacAddress, ClientId>,

    /// Top-up log per client, oldest first.
    transactions: BTreeMap<ClientId, Vec<Transaction>>,

    /// Deduction log per client, oldest first.
    deductions: BTreeMap<ClientId, Vec<Deduction>>,

    next_client_id: u64,
    next_transaction_id: u64,
    next_deduction_id: u64,
}

impl MemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn client_mut(&mut self, mac: MacAddress) -> Option<&mut Client> {
        let id = self.mac_index.get(&mac)?;
        self.clients.get_mut(id)
    }

    fn find_or_create(&mut self, mac: MacAddress, at: Timestamp) -> ClientId {
        if let Some(&id) = self.mac_index.get(&mac) {
            return id;
        }
        self.next_client_id = self.next_client_id.saturating_add(1);
        let id = ClientId(self.next_client_id);
        self.clients.insert(id, Client::new(id, mac, at));
        self.mac_index.insert(mac, id);
        id
    }
}

impl LedgerStore for MemoryLedger {
    fn add_time(
        &mut self,
        mac: MacAddress,
        amount: u64,
        minutes: u64,
        at: Timestamp,
    ) -> Result<Client, PisoError> {
        let seconds = validate_credit(minutes)?;
        let id = self.find_or_create(mac, at);

        self.next_transaction_id = self.next_transaction_id.saturating_add(1);
        self.transactions.entry(id).or_default().push(Transaction {
            id: self.next_transaction_id,
            client_id: id,
            mac,
            amount,
            minutes,
            at,
        });

        let client = self.clients.get_mut(&id).ok_or(PisoError::ClientNotFound(mac))?;
        client.record_top_up(amount, minutes, seconds, at);
        Ok(client.clone())
    }

    fn check_balance(&self, mac: MacAddress) -> Result<Balance, PisoError> {
        Ok(self
            .mac_index
            .get(&mac)
            .and_then(|id| self.clients.get(id))
            .map(|c| c.balance)
            .unwrap_or_default())
    }

    fn deduct_time(
        &mut self,
        mac: MacAddress,
        seconds: u64,
        at: Timestamp,
    ) -> Result<Option<Balance>, PisoError> {
        let Some(client) = self.client_mut(mac) else {
            return Ok(None);
        };

        let taken = client.record_usage(seconds, at);
        let remaining = client.balance;
        if taken == 0 {
            return Ok(Some(remaining));
        }
        let client_id = client.id;

        self.next_deduction_id = self.next_deduction_id.saturating_add(1);
        self.deductions.entry(client_id).or_default().push(Deduction {
            id: self.next_deduction_id,
            client_id,
            mac,
            seconds: taken,
            at,
        });
        Ok(Some(remaining))
    }

    fn set_status(
        &mut self,
        mac: MacAddress,
        status: AccessStatus,
        at: Timestamp,
    ) -> Result<Client, PisoError> {
        let id = self.find_or_create(mac, at);
        let client = self.clients.get_mut(&id).ok_or(PisoError::ClientNotFound(mac))?;
        client.status = status;
        client.updated_at = at;
        Ok(client.clone())
    }

    fn client(&self, mac: MacAddress) -> Result<Option<Client>, PisoError> {
        Ok(self
            .mac_index
            .get(&mac)
            .and_then(|id| self.clients.get(id))
            .cloned())
    }

    fn clients(&self) -> Result<Vec<Client>, PisoError> {
        Ok(self.clients.values().cloned().collect())
    }

    fn transactions(&self, mac: MacAddress) -> Result<Vec<Transaction>, PisoError> {
        let rows = self
            .mac_index
            .get(&mac)
            .and_then(|id| self.transactions.get(id))
            .cloned()
            .unwrap_or_default();
        Ok(truncate_history(rows))
    }

    fn deductions(&self, mac: MacAddress) -> Result<Vec<Deduction>, PisoError> {
        let rows = self
            .mac_index
            .get(&mac)
            .and_then(|id| self.deductions.get(id))
            .cloned()
            .unwrap_or_default();
        Ok(truncate_history(rows))
    }
}

// =============================================================================
// TESTS
// =============================================================================
