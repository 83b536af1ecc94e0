//! # Ledger Module
//!
//! The `Ledger` facade combines a storage backend with the queries the
//! gateway needs (balances, history, status bookkeeping).
//!
//! ## Storage Backends
//!
//! - `InMemory`: `MemoryLedger` (development mode, tests)
//! - `Persistent`: `RedbLedger` for disk-backed ACID storage

use crate::storage::RedbLedger;
use crate::store::{LedgerStore, MemoryLedger};
use crate::{
    AccessStatus, Balance, Client, Deduction, MacAddress, PisoError, Timestamp, Transaction,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Storage backend for a Ledger.
#[derive(Debug)]
pub enum LedgerBackend {
    /// In-memory ledger (fast, volatile).
    InMemory(MemoryLedger),
    /// Disk-backed ledger using redb (ACID, persistent).
    Persistent(RedbLedger),
}

impl Default for LedgerBackend {
    fn default() -> Self {
        Self::InMemory(MemoryLedger::new())
    }
}

/// Everything the ledger knows about one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientHistory {
    pub client: Client,
    pub transactions: Vec<Transaction>,
    pub deductions: Vec<Deduction>,
}

/// The balance ledger used by the meter, the portal and the CLI.
///
/// Does not implement Clone: the redb handle cannot be shared that way.
/// Share a `Ledger` behind a lock instead.
#[derive(Debug, Default)]
pub struct Ledger {
    backend: LedgerBackend,
}

impl Ledger {
    /// Create an empty in-memory ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open or create a persistent ledger at the given path.
    pub fn with_redb(path: impl AsRef<Path>) -> Result<Self, PisoError> {
        Ok(Self {
            backend: LedgerBackend::Persistent(RedbLedger::open(path)?),
        })
    }

    /// Check if using persistent storage.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, LedgerBackend::Persistent(_))
    }

    fn store(&self) -> &dyn LedgerStore {
        match &self.backend {
            LedgerBackend::InMemory(l) => l,
            LedgerBackend::Persistent(l) => l,
        }
    }

    fn store_mut(&mut self) -> &mut dyn LedgerStore {
        match &mut self.backend {
            LedgerBackend::InMemory(l) => l,
            LedgerBackend::Persistent(l) => l,
        }
    }

    // =========================================================================
    // BALANCE OPERATIONS
    // =========================================================================

    /// Credit a top-up. See [`LedgerStore::add_time`].
    pub fn add_time(
        &mut self,
        mac: MacAddress,
        amount: u64,
        minutes: u64,
        at: Timestamp,
    ) -> Result<Client, PisoError> {
        self.store_mut().add_time(mac, amount, minutes, at)
    }

    /// Current balance; zero for unknown clients.
    pub fn check_balance(&self, mac: MacAddress) -> Result<Balance, PisoError> {
        self.store().check_balance(mac)
    }

    /// Take metered time. See [`LedgerStore::deduct_time`].
    pub fn deduct_time(
        &mut self,
        mac: MacAddress,
        seconds: u64,
        at: Timestamp,
    ) -> Result<Option<Balance>, PisoError> {
        self.store_mut().deduct_time(mac, seconds, at)
    }

    /// Record a confirmed firewall status.
    pub fn set_status(
        &mut self,
        mac: MacAddress,
        status: AccessStatus,
        at: Timestamp,
    ) -> Result<Client, PisoError> {
        self.store_mut().set_status(mac, status, at)
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    /// Look up one client.
    pub fn client(&self, mac: MacAddress) -> Result<Option<Client>, PisoError> {
        self.store().client(mac)
    }

    /// All clients, ordered by id.
    pub fn clients(&self) -> Result<Vec<Client>, PisoError> {
        self.store().clients()
    }

    /// Clients whose last confirmed status is `status`.
    pub fn clients_with_status(&self, status: AccessStatus) -> Result<Vec<Client>, PisoError> {
        Ok(self
            .clients()?
            .into_iter()
            .filter(|c| c.status == status)
            .collect())
    }

    /// Client row plus its top-up and deduction logs.
    ///
    /// # Errors
    ///
    /// Returns `PisoError::ClientNotFound` if the ledger has no row for `mac`.
    pub fn history(&self, mac: MacAddress) -> Result<ClientHistory, PisoError> {
        let store = self.store();
        let client = store.client(mac)?.ok_or(PisoError::ClientNotFound(mac))?;
        Ok(ClientHistory {
            client,
            transactions: store.transactions(mac)?,
            deductions: store.deductions(mac)?,
        })
    }

    /// Top-ups for one client.
    pub fn transactions(&self, mac: MacAddress) -> Result<Vec<Transaction>, PisoError> {
        self.store().transactions(mac)
    }

    /// Deductions for one client.
    pub fn deductions(&self, mac: MacAddress) -> Result<Vec<Deduction>, PisoError> {
        self.store().deductions(mac)
    }
}
