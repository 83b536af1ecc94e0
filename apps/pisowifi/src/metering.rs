//! # Metering Loop
//!
//! Polls the access point for connected devices on a fixed interval and,
//! for each one, applies the access decision from `pisowifi_core::access`:
//! charge the tick, block an exhausted client, or lift a stale block.
//!
//! ## Failure Handling
//!
//! - Ledger status is written only after the firewall command succeeded,
//!   so a failed block/unblock is retried on the next tick.
//! - One device failing never stops the others.
//! - A failed device poll backs off `error_backoff_secs` instead of the
//!   full interval.
//! - The ledger lock is never held across a firewall command.

use crate::network::NetworkController;
use pisowifi_core::{
    AccessAction, AccessStatus, Ledger, MacAddress, PisoError, Timestamp, decide,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

/// Current unix time for ledger rows.
pub fn current_timestamp() -> Timestamp {
    Timestamp(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    )
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Devices reported by the access point.
    pub polled: usize,
    /// Devices charged this tick.
    pub charged: usize,
    pub seconds_charged: u64,
    pub blocked: usize,
    pub unblocked: usize,
    /// Exhausted devices already blocked.
    pub held: usize,
    /// Exhausted devices topped up before their block went in; the next
    /// tick charges them instead.
    pub deferred: usize,
    /// Devices whose action failed (retried next tick).
    pub failures: usize,
}

/// Outcome of applying one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Charged { seconds: u64, blocked: bool },
    Blocked,
    Unblocked,
    Held,
    Deferred,
}

/// The access-decision loop.
#[derive(Clone)]
pub struct Meter {
    ledger: Arc<RwLock<Ledger>>,
    network: Arc<dyn NetworkController>,
    /// Seconds charged per tick (the tick interval).
    charge_seconds: u64,
}

impl Meter {
    pub fn new(
        ledger: Arc<RwLock<Ledger>>,
        network: Arc<dyn NetworkController>,
        charge_seconds: u64,
    ) -> Self {
        Self {
            ledger,
            network,
            charge_seconds,
        }
    }

    /// Re-install DROP rules for every client the ledger says is blocked.
    ///
    /// Run once after `NetworkController::setup`, which flushes the chain.
    /// Returns how many blocks were re-applied.
    pub async fn reconcile(&self) -> Result<usize, PisoError> {
        let blocked = self
            .ledger
            .read()
            .await
            .clients_with_status(AccessStatus::Blocked)?;

        let mut applied = 0;
        for client in blocked {
            match self.network.block(client.mac).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    tracing::warn!(mac = %client.mac, "Could not re-apply block: {}", e);
                }
            }
        }
        tracing::info!("Re-applied {} block(s) from the ledger", applied);
        Ok(applied)
    }

    /// Run one metering pass over the connected devices.
    ///
    /// # Errors
    ///
    /// Only a failure to list devices is returned; per-device failures are
    /// logged and counted in the report.
    pub async fn tick(&self, now: Timestamp) -> Result<TickReport, PisoError> {
        let devices = self.network.connected_devices().await?;
        let mut report = TickReport {
            polled: devices.len(),
            ..TickReport::default()
        };

        for mac in devices {
            match self.apply(mac, now).await {
                Ok(Applied::Charged { seconds, blocked }) => {
                    report.charged += 1;
                    report.seconds_charged += seconds;
                    if blocked {
                        report.blocked += 1;
                    }
                }
                Ok(Applied::Blocked) => report.blocked += 1,
                Ok(Applied::Unblocked) => report.unblocked += 1,
                Ok(Applied::Held) => report.held += 1,
                Ok(Applied::Deferred) => report.deferred += 1,
                Err(e) => {
                    report.failures += 1;
                    tracing::error!(%mac, "Metering failed: {}", e);
                }
            }
        }

        Ok(report)
    }

    /// Decide and execute the action for one device.
    async fn apply(&self, mac: MacAddress, now: Timestamp) -> Result<Applied, PisoError> {
        let (balance, status) = {
            let ledger = self.ledger.read().await;
            let status = ledger.client(mac)?.map(|c| c.status).unwrap_or_default();
            (ledger.check_balance(mac)?, status)
        };

        let action = decide(balance, status, self.charge_seconds);
        match action {
            AccessAction::Hold => Ok(Applied::Held),
            AccessAction::Block => {
                // A top-up may have committed since the read above.
                if !self.ledger.read().await.check_balance(mac)?.is_exhausted() {
                    tracing::debug!(%mac, "Top-up arrived before block; skipping");
                    return Ok(Applied::Deferred);
                }
                self.block(mac, now).await?;
                tracing::info!(%mac, "Blocked due to zero balance");
                Ok(Applied::Blocked)
            }
            AccessAction::Unblock => {
                self.network.unblock(mac).await?;
                self.ledger
                    .write()
                    .await
                    .set_status(mac, AccessStatus::Active, now)?;
                tracing::info!(%mac, balance = balance.seconds(), "Lifted block on funded client");
                Ok(Applied::Unblocked)
            }
            AccessAction::Charge { seconds } | AccessAction::ChargeAndBlock { seconds } => {
                let (taken, remaining) = {
                    let mut ledger = self.ledger.write().await;
                    let before = ledger.check_balance(mac)?;
                    let remaining = ledger.deduct_time(mac, seconds, now)?.unwrap_or_default();
                    if status != AccessStatus::Active && !remaining.is_exhausted() {
                        ledger.set_status(mac, AccessStatus::Active, now)?;
                    }
                    (before.seconds().saturating_sub(remaining.seconds()), remaining)
                };
                // A top-up landing between the read and the deduction
                // cancels the planned block.
                let blocked = action.blocks() && remaining.is_exhausted();
                if blocked {
                    self.block(mac, now).await?;
                    tracing::info!(%mac, "Time used up, client blocked");
                }
                Ok(Applied::Charged {
                    seconds: taken,
                    blocked,
                })
            }
        }
    }

    async fn block(&self, mac: MacAddress, now: Timestamp) -> Result<(), PisoError> {
        self.network.block(mac).await?;
        self.ledger
            .write()
            .await
            .set_status(mac, AccessStatus::Blocked, now)?;
        Ok(())
    }

    /// Tick until `shutdown` turns true (or its sender is dropped).
    pub async fn run(self, interval: Duration, backoff: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            charge_secs = self.charge_seconds,
            "Metering started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.tick(current_timestamp()).await {
                Ok(report) => {
                    tracing::debug!(?report, "Metering tick");
                    interval
                }
                Err(e) => {
                    tracing::error!("Error in time deduction: {}", e);
                    backoff
                }
            };

            tokio::select! {
                () = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Metering stopped");
    }

    /// Spawn `run` on the current runtime.
    pub fn spawn(
        self,
        interval: Duration,
        backoff: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(interval, backoff, shutdown))
    }
}
