//! # iptables Firewall Controller
//!
//! Production network control for a Linux access point.
//!
//! Per-MAC DROP rules live in a dedicated chain (`PISOWIFI` by default)
//! jumped to from the top of `FORWARD`. When a portal address is set, a
//! chain of the same name in the `nat` table sends a blocked client's
//! plain HTTP to the portal. Both chains are flushed at setup, so the
//! meter re-applies blocks from the ledger after a restart.

use super::{
    CommandOutput, CommandRunner, NetworkController, parse_arp_table, parse_mac_addresses,
};
use crate::config::NetworkConfig;
use async_trait::async_trait;
use pisowifi_core::{MacAddress, PisoError};
use std::net::SocketAddrV4;
use std::path::PathBuf;

/// Kernel switch for IPv4 forwarding.
pub const IP_FORWARD_PATH: &str = "/proc/sys/net/ipv4/ip_forward";

const IPTABLES: &str = "iptables";

/// Network controller backed by iptables, iw and arp.
#[derive(Debug)]
pub struct FirewallController<R> {
    runner: R,
    interface: String,
    uplink: String,
    chain: String,
    portal: Option<SocketAddrV4>,
    ip_forward_path: PathBuf,
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| (*s).to_string()).collect()
}

impl<R: CommandRunner> FirewallController<R> {
    pub fn new(runner: R, config: &NetworkConfig) -> Self {
        Self {
            runner,
            interface: config.interface.clone(),
            uplink: config.uplink.clone(),
            chain: config.chain.clone(),
            portal: config.portal,
            ip_forward_path: PathBuf::from(IP_FORWARD_PATH),
        }
    }

    /// Write the forwarding switch somewhere else (tests).
    pub fn with_ip_forward_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ip_forward_path = path.into();
        self
    }

    /// Run a command and turn a non-zero exit into `CommandFailed`.
    async fn run_checked(&self, program: &str, argv: Vec<String>) -> Result<CommandOutput, PisoError> {
        let output = self.runner.run(program, &argv).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(PisoError::CommandFailed(format!(
                "{} {} exited with {:?}: {}",
                program,
                argv.join(" "),
                output.code,
                output.stderr.trim()
            )))
        }
    }

    /// `iptables [-t table] -C <rule>` exit status.
    async fn rule_exists(&self, table: Option<&str>, rule: &[String]) -> Result<bool, PisoError> {
        let mut argv = Vec::new();
        if let Some(t) = table {
            argv.extend(args(&["-t", t]));
        }
        argv.push("-C".to_string());
        argv.extend_from_slice(rule);
        Ok(self.runner.run(IPTABLES, &argv).await?.success())
    }

    /// Delete `rule` if it is present.
    async fn remove_rule(&self, table: Option<&str>, rule: Vec<String>) -> Result<(), PisoError> {
        if !self.rule_exists(table, &rule).await? {
            return Ok(());
        }
        let mut argv = Vec::new();
        if let Some(t) = table {
            argv.extend(args(&["-t", t]));
        }
        argv.push("-D".to_string());
        argv.extend(rule);
        self.run_checked(IPTABLES, argv).await.map(|_| ())
    }

    /// Create the dedicated chain in `table` (an existing one is fine) and
    /// flush it.
    async fn reset_chain(&self, table: Option<&str>) -> Result<(), PisoError> {
        let prefix: Vec<String> = match table {
            Some(t) => args(&["-t", t]),
            None => Vec::new(),
        };
        let with = |flag: &str| {
            let mut argv = prefix.clone();
            argv.extend(args(&[flag, self.chain.as_str()]));
            argv
        };

        let created = self.runner.run(IPTABLES, &with("-N")).await?;
        if !created.success() && !created.stderr.contains("exists") {
            return Err(PisoError::CommandFailed(format!(
                "iptables {}: {}",
                with("-N").join(" "),
                created.stderr.trim()
            )));
        }
        self.run_checked(IPTABLES, with("-F")).await.map(|_| ())
    }

    /// Add `rule` with `action` (`-A` or `-I`) unless it is already present.
    async fn ensure_rule(
        &self,
        table: Option<&str>,
        action: &str,
        rule: Vec<String>,
    ) -> Result<(), PisoError> {
        if self.rule_exists(table, &rule).await? {
            return Ok(());
        }
        let mut argv = Vec::new();
        if let Some(t) = table {
            argv.extend(args(&["-t", t]));
        }
        argv.push(action.to_string());
        argv.extend(rule);
        self.run_checked(IPTABLES, argv).await.map(|_| ())
    }

    fn drop_rule(&self, mac: MacAddress) -> Vec<String> {
        args(&[
            self.chain.as_str(),
            "-m",
            "mac",
            "--mac-source",
            mac.to_string().as_str(),
            "-j",
            "DROP",
        ])
    }

    fn redirect_rule(&self, mac: MacAddress, portal: SocketAddrV4) -> Vec<String> {
        args(&[
            self.chain.as_str(),
            "-p",
            "tcp",
            "--dport",
            "80",
            "-m",
            "mac",
            "--mac-source",
            mac.to_string().as_str(),
            "-j",
            "DNAT",
            "--to-destination",
            portal.to_string().as_str(),
        ])
    }

    /// Wireless interfaces (`wlan0`, `wlp2s0`) list stations through `iw`;
    /// anything else (bridges, virtual APs) falls back to the arp table.
    fn is_wireless(&self) -> bool {
        self.interface.starts_with("wl")
    }
}

#[async_trait]
impl<R: CommandRunner> NetworkController for FirewallController<R> {
    async fn setup(&self) -> Result<(), PisoError> {
        tokio::fs::write(&self.ip_forward_path, b"1")
            .await
            .map_err(|e| {
                PisoError::IoError(format!(
                    "cannot enable forwarding via {}: {}",
                    self.ip_forward_path.display(),
                    e
                ))
            })?;

        self.reset_chain(None).await?;
        self.ensure_rule(None, "-I", args(&["FORWARD", "-j", self.chain.as_str()]))
            .await?;
        if self.portal.is_some() {
            self.reset_chain(Some("nat")).await?;
            self.ensure_rule(
                Some("nat"),
                "-I",
                args(&["PREROUTING", "-i", self.interface.as_str(), "-j", self.chain.as_str()]),
            )
            .await?;
        }
        self.ensure_rule(
            Some("nat"),
            "-A",
            args(&["POSTROUTING", "-o", self.uplink.as_str(), "-j", "MASQUERADE"]),
        )
        .await?;
        self.ensure_rule(
            None,
            "-A",
            args(&["FORWARD", "-i", self.interface.as_str(), "-j", "ACCEPT"]),
        )
        .await?;
        self.ensure_rule(
            None,
            "-A",
            args(&["FORWARD", "-o", self.interface.as_str(), "-j", "ACCEPT"]),
        )
        .await?;

        tracing::info!(
            interface = %self.interface,
            uplink = %self.uplink,
            chain = %self.chain,
            portal = ?self.portal,
            "Firewall ready"
        );
        Ok(())
    }

    async fn block(&self, mac: MacAddress) -> Result<(), PisoError> {
        self.ensure_rule(None, "-A", self.drop_rule(mac)).await?;
        if let Some(portal) = self.portal {
            self.ensure_rule(Some("nat"), "-A", self.redirect_rule(mac, portal))
                .await?;
        }
        tracing::info!(%mac, "Blocked MAC address");
        Ok(())
    }

    async fn unblock(&self, mac: MacAddress) -> Result<(), PisoError> {
        self.remove_rule(None, self.drop_rule(mac)).await?;
        if let Some(portal) = self.portal {
            self.remove_rule(Some("nat"), self.redirect_rule(mac, portal))
                .await?;
        }
        tracing::info!(%mac, "Unblocked MAC address");
        Ok(())
    }

    async fn connected_devices(&self) -> Result<Vec<MacAddress>, PisoError> {
        if self.is_wireless() {
            let argv = args(&["dev", self.interface.as_str(), "station", "dump"]);
            let output = self.run_checked("iw", argv).await?;
            return Ok(parse_mac_addresses(&output.stdout));
        }
        // `-i` narrows the table; the row filter also covers arp builds
        // that ignore it.
        let argv = args(&["-n", "-i", self.interface.as_str()]);
        let output = self.run_checked("arp", argv).await?;
        Ok(parse_arp_table(&output.stdout, &self.interface))
    }
}
