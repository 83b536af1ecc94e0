//! # redb-backed Ledger Storage
//!
//! A disk-backed balance ledger using the redb embedded database, providing:
//! - ACID transactions (a top-up and its transaction row commit together)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! ## Integration with Ledger
//!
//! `RedbLedger` is the persistent backend behind `Ledger`. Unlike
//! `MemoryLedger`, every write is on disk once the call returns.

use crate::store::{LedgerStore, truncate_history, validate_credit};
use crate::{
    AccessStatus, Balance, Client, ClientId, Deduction, MacAddress, PisoError, Timestamp,
    Transaction,
};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;

/// Table for clients: ClientId(u64) -> serialized Client bytes
const CLIENTS: TableDefinition<u64, &[u8]> = TableDefinition::new("clients");

/// Table for the MAC index: MacAddress as u64 -> ClientId(u64)
const MAC_INDEX: TableDefinition<u64, u64> = TableDefinition::new("mac_index");

/// Table for top-ups: (client_id, transaction_id) -> serialized Transaction
const TRANSACTIONS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("transactions");

/// Table for deductions: (client_id, deduction_id) -> serialized Deduction
const DEDUCTIONS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("deductions");

/// Table for metadata: counter name -> value
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

const NEXT_CLIENT_ID: &str = "next_client_id";
const NEXT_TRANSACTION_ID: &str = "next_transaction_id";
const NEXT_DEDUCTION_ID: &str = "next_deduction_id";

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, PisoError> {
    postcard::to_allocvec(value).map_err(|e| PisoError::SerializationError(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, PisoError> {
    postcard::from_bytes(bytes).map_err(|e| PisoError::SerializationError(e.to_string()))
}

/// A disk-backed ledger using redb.
///
/// Keeps the MAC index in memory; the index and id counters are updated
/// only after a successful commit.
pub struct RedbLedger {
    /// The redb database handle.
    db: Database,
    /// In-memory cache of mac -> client id.
    mac_cache: BTreeMap<MacAddress, ClientId>,
    /// Last allocated ids (0 = none yet).
    last_client_id: u64,
    last_transaction_id: u64,
    last_deduction_id: u64,
}

impl std::fmt::Debug for RedbLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbLedger")
            .field("mac_cache_size", &self.mac_cache.len())
            .field("last_client_id", &self.last_client_id)
            .finish_non_exhaustive()
    }
}

impl RedbLedger {
    /// Open or create a ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PisoError> {
        let db = Database::create(path.as_ref()).map_err(|e| match e {
            redb::DatabaseError::DatabaseAlreadyOpen => {
                PisoError::LedgerBusy(path.as_ref().display().to_string())
            }
            other => PisoError::IoError(other.to_string()),
        })?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(CLIENTS)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(MAC_INDEX)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(TRANSACTIONS)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(DEDUCTIONS)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(METADATA)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| PisoError::IoError(e.to_string()))?;
        }

        let read_txn = db
            .begin_read()
            .map_err(|e| PisoError::IoError(e.to_string()))?;

        let (last_client_id, last_transaction_id, last_deduction_id) = {
            let table = read_txn
                .open_table(METADATA)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let read = |key: &str| -> Result<u64, PisoError> {
                Ok(table
                    .get(key)
                    .map_err(|e| PisoError::IoError(e.to_string()))?
                    .map(|v| v.value())
                    .unwrap_or(0))
            };
            (
                read(NEXT_CLIENT_ID)?,
                read(NEXT_TRANSACTION_ID)?,
                read(NEXT_DEDUCTION_ID)?,
            )
        };

        let mac_cache = {
            let table = read_txn
                .open_table(MAC_INDEX)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let mut cache = BTreeMap::new();
            for entry in table
                .iter()
                .map_err(|e| PisoError::IoError(e.to_string()))?
            {
                let (key, value) = entry.map_err(|e| PisoError::IoError(e.to_string()))?;
                cache.insert(MacAddress::from_u64(key.value()), ClientId(value.value()));
            }
            cache
        };

        Ok(Self {
            db,
            mac_cache,
            last_client_id,
            last_transaction_id,
            last_deduction_id,
        })
    }

    /// Read a client row by id.
    fn read_client(&self, id: ClientId) -> Result<Option<Client>, PisoError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| PisoError::IoError(e.to_string()))?;
        let table = read_txn
            .open_table(CLIENTS)
            .map_err(|e| PisoError::IoError(e.to_string()))?;
        let guard = table
            .get(id.0)
            .map_err(|e| PisoError::IoError(e.to_string()))?;
        guard.map(|data| decode(data.value())).transpose()
    }

    /// Read every row logged for `client` in a per-client log table.
    fn read_log<T: DeserializeOwned>(
        &self,
        definition: TableDefinition<'static, (u64, u64), &'static [u8]>,
        client: ClientId,
    ) -> Result<Vec<T>, PisoError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| PisoError::IoError(e.to_string()))?;
        let table = read_txn
            .open_table(definition)
            .map_err(|e| PisoError::IoError(e.to_string()))?;

        let mut rows = Vec::new();
        for entry in table
            .range((client.0, 0u64)..=(client.0, u64::MAX))
            .map_err(|e| PisoError::IoError(e.to_string()))?
        {
            let (_, value) = entry.map_err(|e| PisoError::IoError(e.to_string()))?;
            rows.push(decode(value.value())?);
        }
        Ok(truncate_history(rows))
    }

    /// Load the client row for `mac` inside a write transaction, creating it
    /// if it does not exist. Returns the row and whether it was created.
    fn load_or_create(
        &self,
        write_txn: &redb::WriteTransaction,
        mac: MacAddress,
        at: Timestamp,
    ) -> Result<(Client, bool), PisoError> {
        if let Some(&id) = self.mac_cache.get(&mac) {
            let table = write_txn
                .open_table(CLIENTS)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let client = table
                .get(id.0)
                .map_err(|e| PisoError::IoError(e.to_string()))?
                .map(|data| decode::<Client>(data.value()))
                .transpose()?
                .ok_or(PisoError::ClientNotFound(mac))?;
            return Ok((client, false));
        }

        let id = ClientId(self.last_client_id.saturating_add(1));
        {
            let mut index = write_txn
                .open_table(MAC_INDEX)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            index
                .insert(mac.to_u64(), id.0)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            meta.insert(NEXT_CLIENT_ID, id.0)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
        }
        Ok((Client::new(id, mac, at), true))
    }

    /// Write a client row inside a write transaction.
    fn store_client(write_txn: &redb::WriteTransaction, client: &Client) -> Result<(), PisoError> {
        let bytes = encode(client)?;
        let mut table = write_txn
            .open_table(CLIENTS)
            .map_err(|e| PisoError::IoError(e.to_string()))?;
        table
            .insert(client.id.0, bytes.as_slice())
            .map_err(|e| PisoError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Commit and, on success, publish a newly created client to the cache.
    fn commit(
        &mut self,
        write_txn: redb::WriteTransaction,
        client: &Client,
        created: bool,
    ) -> Result<(), PisoError> {
        write_txn
            .commit()
            .map_err(|e| PisoError::IoError(e.to_string()))?;
        if created {
            self.mac_cache.insert(client.mac, client.id);
            self.last_client_id = client.id.0;
        }
        Ok(())
    }
}

// =============================================================================
// LEDGERSTORE TRAIT IMPLEMENTATION
// =============================================================================

impl LedgerStore for RedbLedger {
    fn add_time(
        &mut self,
        mac: MacAddress,
        amount: u64,
        minutes: u64,
        at: Timestamp,
    ) -> Result<Client, PisoError> {
        let seconds = validate_credit(minutes)?;

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| PisoError::IoError(e.to_string()))?;

        let (mut client, created) = self.load_or_create(&write_txn, mac, at)?;
        client.record_top_up(amount, minutes, seconds, at);
        Self::store_client(&write_txn, &client)?;

        let transaction_id = self.last_transaction_id.saturating_add(1);
        let transaction = Transaction {
            id: transaction_id,
            client_id: client.id,
            mac,
            amount,
            minutes,
            at,
        };
        {
            let bytes = encode(&transaction)?;
            let mut log = write_txn
                .open_table(TRANSACTIONS)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            log.insert((client.id.0, transaction_id), bytes.as_slice())
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            meta.insert(NEXT_TRANSACTION_ID, transaction_id)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
        }

        self.commit(write_txn, &client, created)?;
        self.last_transaction_id = transaction_id;
        Ok(client)
    }

    fn check_balance(&self, mac: MacAddress) -> Result<Balance, PisoError> {
        Ok(self.client(mac)?.map(|c| c.balance).unwrap_or_default())
    }

    fn deduct_time(
        &mut self,
        mac: MacAddress,
        seconds: u64,
        at: Timestamp,
    ) -> Result<Option<Balance>, PisoError> {
        let Some(mut client) = self.client(mac)? else {
            return Ok(None);
        };

        let taken = client.record_usage(seconds, at);
        let remaining = client.balance;
        if taken == 0 {
            return Ok(Some(remaining));
        }

        let deduction_id = self.last_deduction_id.saturating_add(1);
        let deduction = Deduction {
            id: deduction_id,
            client_id: client.id,
            mac,
            seconds: taken,
            at,
        };

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| PisoError::IoError(e.to_string()))?;
        Self::store_client(&write_txn, &client)?;
        {
            let bytes = encode(&deduction)?;
            let mut log = write_txn
                .open_table(DEDUCTIONS)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            log.insert((client.id.0, deduction_id), bytes.as_slice())
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            let mut meta = write_txn
                .open_table(METADATA)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
            meta.insert(NEXT_DEDUCTION_ID, deduction_id)
                .map_err(|e| PisoError::IoError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| PisoError::IoError(e.to_string()))?;

        self.last_deduction_id = deduction_id;
        Ok(Some(remaining))
    }

    fn set_status(
        &mut self,
        mac: MacAddress,
        status: AccessStatus,
        at: Timestamp,
    ) -> Result<Client, PisoError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| PisoError::IoError(e.to_string()))?;

        let (mut client, created) = self.load_or_create(&write_txn, mac, at)?;
        client.status = status;
        client.updated_at = at;
        Self::store_client(&write_txn, &client)?;

        self.commit(write_txn, &client, created)?;
        Ok(client)
    }

    fn client(&self, mac: MacAddress) -> Result<Option<Client>, PisoError> {
        match self.mac_cache.get(&mac) {
            Some(&id) => self.read_client(id),
            None => Ok(None),
        }
    }

    fn clients(&self) -> Result<Vec<Client>, PisoError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| PisoError::IoError(e.to_string()))?;
        let table = read_txn
            .open_table(CLIENTS)
            .map_err(|e| PisoError::IoError(e.to_string()))?;

        let mut clients = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| PisoError::IoError(e.to_string()))?
        {
            let (_, value) = entry.map_err(|e| PisoError::IoError(e.to_string()))?;
            clients.push(decode(value.value())?);
        }
        Ok(clients)
    }

    fn transactions(&self, mac: MacAddress) -> Result<Vec<Transaction>, PisoError> {
        match self.mac_cache.get(&mac) {
            Some(&id) => self.read_log(TRANSACTIONS, id),
            None => Ok(Vec::new()),
        }
    }

    fn deductions(&self, mac: MacAddress) -> Result<Vec<Deduction>, PisoError> {
        match self.mac_cache.get(&mac) {
            Some(&id) => self.read_log(DEDUCTIONS, id),
            None => Ok(Vec::new()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
