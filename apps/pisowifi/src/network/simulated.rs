//! # Simulated Network Controller
//!
//! Development stand-in for the firewall: logs what it would do and keeps
//! the blocked set in memory.

use super::NetworkController;
use async_trait::async_trait;
use pisowifi_core::{MacAddress, PisoError};
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Devices reported when no list is given.
pub const DEFAULT_DEV_DEVICES: [MacAddress; 2] = [
    MacAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
    MacAddress::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
];

/// In-memory network controller for development and tests.
#[derive(Debug)]
pub struct SimulatedController {
    devices: Mutex<Vec<MacAddress>>,
    blocked: Mutex<BTreeSet<MacAddress>>,
}

impl Default for SimulatedController {
    fn default() -> Self {
        Self::with_devices(DEFAULT_DEV_DEVICES.to_vec())
    }
}

impl SimulatedController {
    pub fn with_devices(devices: Vec<MacAddress>) -> Self {
        Self {
            devices: Mutex::new(devices),
            blocked: Mutex::new(BTreeSet::new()),
        }
    }

    /// Replace the reported device list (a client joined or left).
    pub fn set_devices(&self, devices: Vec<MacAddress>) {
        *self.devices.lock().unwrap_or_else(|e| e.into_inner()) = devices;
    }

    /// Addresses currently blocked.
    pub fn blocked(&self) -> BTreeSet<MacAddress> {
        self.blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_blocked(&self, mac: MacAddress) -> bool {
        self.blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&mac)
    }
}

#[async_trait]
impl NetworkController for SimulatedController {
    async fn setup(&self) -> Result<(), PisoError> {
        tracing::info!("Running in development mode - skipping real network setup");
        Ok(())
    }

    async fn block(&self, mac: MacAddress) -> Result<(), PisoError> {
        tracing::info!("DEV: Blocking MAC address {}", mac);
        self.blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(mac);
        Ok(())
    }

    async fn unblock(&self, mac: MacAddress) -> Result<(), PisoError> {
        tracing::info!("DEV: Unblocking MAC address {}", mac);
        self.blocked
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&mac);
        Ok(())
    }

    async fn connected_devices(&self) -> Result<Vec<MacAddress>, PisoError> {
        Ok(self
            .devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }
}
