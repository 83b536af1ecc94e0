//! # Network Controller
//!
//! Everything the gateway does to the host network goes through the
//! `NetworkController` trait:
//!
//! - `FirewallController`: production; runs `iptables`, `iw` and `arp`
//! - `SimulatedController`: development; logs and keeps state in memory
//!
//! External programs are started through `CommandRunner`, so the firewall
//! logic can be exercised against a scripted runner.

mod firewall;
mod simulated;

pub use firewall::{FirewallController, IP_FORWARD_PATH};
pub use simulated::{DEFAULT_DEV_DEVICES, SimulatedController};

use async_trait::async_trait;
use pisowifi_core::{MacAddress, PisoError};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{NetworkConfig, NetworkMode};

// =============================================================================
// COMMAND RUNNER
// =============================================================================

/// Captured result of an external program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Starts external programs.
///
/// A non-zero exit is NOT an error at this level; callers decide what a
/// failed `iptables -C` means. Errors are reserved for programs that could
/// not be started or did not finish in time.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, PisoError>;
}

/// Runs programs on the host with a per-command timeout.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, PisoError> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                PisoError::CommandFailed(format!(
                    "{} {} timed out after {}s",
                    program,
                    args.join(" "),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| PisoError::CommandFailed(format!("cannot run {}: {}", program, e)))?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// =============================================================================
// NETWORK CONTROLLER
// =============================================================================

/// Host network operations used by the meter and the portal.
///
/// `block` and `unblock` are idempotent: blocking a blocked client or
/// unblocking a forwarding client succeeds without changing anything.
#[async_trait]
pub trait NetworkController: Send + Sync {
    /// One-time setup: forwarding, NAT, and the per-MAC DROP chain.
    async fn setup(&self) -> Result<(), PisoError>;

    /// Stop forwarding traffic from `mac`.
    async fn block(&self, mac: MacAddress) -> Result<(), PisoError>;

    /// Resume forwarding traffic from `mac`.
    async fn unblock(&self, mac: MacAddress) -> Result<(), PisoError>;

    /// Hardware addresses currently associated with the access point.
    async fn connected_devices(&self) -> Result<Vec<MacAddress>, PisoError>;
}

/// Build the controller selected by the network config.
pub fn controller_from_config(config: &NetworkConfig) -> Arc<dyn NetworkController> {
    match config.mode {
        NetworkMode::Production => Arc::new(FirewallController::new(
            SystemRunner::new(config.command_timeout()),
            config,
        )),
        NetworkMode::Development => Arc::new(SimulatedController::default()),
    }
}

// =============================================================================
// DEVICE LIST PARSING
// =============================================================================

/// Extract every client MAC address from `iw station dump` or `arp` output.
///
/// Accepts `:` and `-` separators, normalizes to upper-case colon form,
/// drops broadcast / all-zero placeholders, and de-duplicates while keeping
/// first-seen order.
pub fn parse_mac_addresses(text: &str) -> Vec<MacAddress> {
    const BROADCAST: MacAddress = MacAddress::new([0xFF; 6]);
    const UNSET: MacAddress = MacAddress::new([0x00; 6]);

    let mut found: Vec<MacAddress> = Vec::new();
    for token in text.split(|c: char| c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | ',' | ';')) {
        let Ok(mac) = token.parse::<MacAddress>() else {
            continue;
        };
        if mac == BROADCAST || mac == UNSET || found.contains(&mac) {
            continue;
        }
        found.push(mac);
    }
    found
}

/// Extract client MAC addresses from an `arp` listing, keeping only the
/// neighbours learned on `interface`.
///
/// Both `arp -n` (interface in the last column) and `arp -a`
/// (`... on <iface>`) end each entry with the interface name.
pub fn parse_arp_table(text: &str, interface: &str) -> Vec<MacAddress> {
    let rows: Vec<&str> = text
        .lines()
        .filter(|line| line.split_whitespace().last() == Some(interface))
        .collect();
    parse_mac_addresses(&rows.join("\n"))
}
