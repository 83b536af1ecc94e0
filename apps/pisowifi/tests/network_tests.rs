//! Integration tests for the iptables firewall controller.
//!
//! A fake runner keeps an in-memory rule table so `-C` / `-A` / `-D`
//! behave like iptables, and records every command issued.

#![allow(clippy::unwrap_used, clippy::panic)]

use async_trait::async_trait;
use pisowifi::config::NetworkConfig;
use pisowifi::network::{CommandOutput, CommandRunner, FirewallController, NetworkController};
use pisowifi_core::{MacAddress, PisoError};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

// =============================================================================
// FAKE IPTABLES
// =============================================================================

#[derive(Default)]
struct FakeState {
    rules: BTreeSet<String>,
    chains: BTreeSet<String>,
    calls: Vec<String>,
    device_output: String,
    fail_appends: bool,
}

#[derive(Clone, Default)]
struct FakeHost {
    state: Arc<Mutex<FakeState>>,
}

impl FakeHost {
    fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn has_rule(&self, rule: &str) -> bool {
        self.state.lock().unwrap().rules.contains(rule)
    }

    fn set_devices(&self, output: &str) {
        self.state.lock().unwrap().device_output = output.to_string();
    }

    fn fail_appends(&self, on: bool) {
        self.state.lock().unwrap().fail_appends = on;
    }
}

/// Split `[-t table] <action> <rule...>` into (action, "table rule...").
fn split_iptables(args: &[String]) -> (String, String) {
    let (table, rest) = match args {
        [t, name, rest @ ..] if t == "-t" => (name.clone(), rest),
        rest => ("filter".to_string(), rest),
    };
    let action = rest.first().cloned().unwrap_or_default();
    let rule = rest.get(1..).unwrap_or_default().join(" ");
    (action, format!("{} {}", table, rule))
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, PisoError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{} {}", program, args.join(" ")));

        if program != "iptables" {
            return Ok(CommandOutput::ok(state.device_output.clone()));
        }

        let (action, rule) = split_iptables(args);
        let output = match action.as_str() {
            "-N" if state.chains.contains(&rule) => CommandOutput::failed(1, "iptables: Chain already exists."),
            "-N" => {
                state.chains.insert(rule);
                CommandOutput::ok("")
            }
            "-F" => {
                let prefix = format!("{} ", rule);
                state.rules.retain(|r| !r.starts_with(&prefix));
                CommandOutput::ok("")
            }
            "-C" if state.rules.contains(&rule) => CommandOutput::ok(""),
            "-C" => CommandOutput::failed(1, "iptables: Bad rule (does a matching rule exist in that chain?)."),
            "-A" | "-I" if state.fail_appends => CommandOutput::failed(4, "iptables: Resource temporarily unavailable."),
            "-A" | "-I" => {
                state.rules.insert(rule);
                CommandOutput::ok("")
            }
            "-D" if state.rules.remove(&rule) => CommandOutput::ok(""),
            _ => CommandOutput::failed(2, "iptables: unsupported"),
        };
        Ok(output)
    }
}

fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

const DROP_PHONE: &str = "filter PISOWIFI -m mac --mac-source 00:11:22:33:44:55 -j DROP";
const REDIRECT_PHONE: &str = "nat PISOWIFI -p tcp --dport 80 -m mac --mac-source 00:11:22:33:44:55 -j DNAT --to-destination 10.0.0.1:5000";

fn firewall(host: &FakeHost, dir: &tempfile::TempDir) -> FirewallController<FakeHost> {
    FirewallController::new(host.clone(), &NetworkConfig::default())
        .with_ip_forward_path(dir.path().join("ip_forward"))
}

// =============================================================================
// SETUP
// =============================================================================

#[tokio::test]
async fn setup_enables_forwarding_and_installs_rules() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let fw = firewall(&host, &dir);

    fw.setup().await.unwrap();

    assert_eq!(std::fs::read_to_string(dir.path().join("ip_forward")).unwrap(), "1");
    assert!(host.has_rule("filter FORWARD -j PISOWIFI"));
    assert!(host.has_rule("nat POSTROUTING -o eth0 -j MASQUERADE"));
    assert!(host.has_rule("filter FORWARD -i wlan0 -j ACCEPT"));
    assert!(host.has_rule("filter FORWARD -o wlan0 -j ACCEPT"));
    assert!(host.has_rule("nat PREROUTING -i wlan0 -j PISOWIFI"));
}

#[tokio::test]
async fn setup_without_portal_skips_nat_chain() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let config = NetworkConfig {
        portal: None,
        ..NetworkConfig::default()
    };
    let fw = FirewallController::new(host.clone(), &config)
        .with_ip_forward_path(dir.path().join("ip_forward"));

    fw.setup().await.unwrap();
    fw.block(mac("00:11:22:33:44:55")).await.unwrap();

    assert!(host.has_rule(DROP_PHONE));
    assert!(!host.has_rule(REDIRECT_PHONE));
    assert!(host.calls().iter().all(|c| !c.contains("PREROUTING")));
}

#[tokio::test]
async fn setup_twice_flushes_chain_without_duplicating_rules() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let fw = firewall(&host, &dir);

    fw.setup().await.unwrap();
    fw.block(mac("00:11:22:33:44:55")).await.unwrap();
    host.clear_calls();

    fw.setup().await.unwrap();

    assert!(!host.has_rule(DROP_PHONE));
    assert!(!host.has_rule(REDIRECT_PHONE));
    let appends = host
        .calls()
        .iter()
        .filter(|c| c.contains(" -A ") || c.contains(" -I "))
        .count();
    assert_eq!(appends, 0);
}

#[tokio::test]
async fn setup_reports_unwritable_forwarding_switch() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let fw = FirewallController::new(host, &NetworkConfig::default())
        .with_ip_forward_path(dir.path().join("missing").join("ip_forward"));

    assert!(matches!(fw.setup().await, Err(PisoError::IoError(_))));
}

// =============================================================================
// BLOCK / UNBLOCK
// =============================================================================

#[tokio::test]
async fn block_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let fw = firewall(&host, &dir);
    let phone = mac("00-11-22-33-44-55");

    fw.block(phone).await.unwrap();
    fw.block(phone).await.unwrap();

    assert!(host.has_rule(DROP_PHONE));
    let appends: Vec<String> = host
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("iptables -A PISOWIFI"))
        .collect();
    assert_eq!(appends.len(), 1);
}

#[tokio::test]
async fn unblock_of_unblocked_client_issues_no_delete() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let fw = firewall(&host, &dir);

    fw.unblock(mac("00:11:22:33:44:55")).await.unwrap();

    assert!(host.calls().iter().all(|c| !c.contains(" -D ")));
}

#[tokio::test]
async fn unblock_removes_drop_rule() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let fw = firewall(&host, &dir);
    let phone = mac("00:11:22:33:44:55");

    fw.block(phone).await.unwrap();
    fw.unblock(phone).await.unwrap();

    assert!(!host.has_rule(DROP_PHONE));
    assert!(!host.has_rule(REDIRECT_PHONE));
}

#[tokio::test]
async fn block_redirects_web_traffic_to_portal() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let fw = firewall(&host, &dir);
    let phone = mac("00:11:22:33:44:55");

    fw.block(phone).await.unwrap();
    fw.block(phone).await.unwrap();

    assert!(host.has_rule(REDIRECT_PHONE));
    let redirects = host
        .calls()
        .iter()
        .filter(|c| c.starts_with("iptables -t nat -A PISOWIFI"))
        .count();
    assert_eq!(redirects, 1);
}

#[tokio::test]
async fn failed_append_is_command_error() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    let fw = firewall(&host, &dir);
    host.fail_appends(true);

    let err = fw.block(mac("00:11:22:33:44:55")).await.unwrap_err();

    match err {
        PisoError::CommandFailed(msg) => assert!(msg.contains("Resource temporarily unavailable")),
        other => panic!("unexpected error: {other:?}"),
    }
}

// =============================================================================
// DEVICE LISTING
// =============================================================================

#[tokio::test]
async fn wireless_interface_uses_station_dump() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    host.set_devices("Station 00:11:22:33:44:55 (on wlan0)\n\tsignal: -40 dBm\n");
    let fw = firewall(&host, &dir);

    let devices = fw.connected_devices().await.unwrap();

    assert_eq!(devices, vec![mac("00:11:22:33:44:55")]);
    assert_eq!(host.calls(), vec!["iw dev wlan0 station dump".to_string()]);
}

#[tokio::test]
async fn wired_interface_uses_arp_table() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    host.set_devices("10.0.0.20 ether aa:bb:cc:dd:ee:ff C br0\n");
    let config = NetworkConfig {
        interface: "br0".to_string(),
        ..NetworkConfig::default()
    };
    let fw = FirewallController::new(host.clone(), &config)
        .with_ip_forward_path(dir.path().join("ip_forward"));

    let devices = fw.connected_devices().await.unwrap();

    assert_eq!(devices, vec![mac("AA:BB:CC:DD:EE:FF")]);
    assert_eq!(host.calls(), vec!["arp -n -i br0".to_string()]);
}

#[tokio::test]
async fn arp_listing_ignores_uplink_router() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    host.set_devices(
        "Address HWtype HWaddress Flags Mask Iface\n\
         192.168.1.1 ether 11:22:33:44:55:66 C eth0\n\
         10.0.0.20 ether aa:bb:cc:dd:ee:ff C br0\n",
    );
    let config = NetworkConfig {
        interface: "br0".to_string(),
        ..NetworkConfig::default()
    };
    let fw = FirewallController::new(host.clone(), &config)
        .with_ip_forward_path(dir.path().join("ip_forward"));

    let devices = fw.connected_devices().await.unwrap();

    assert_eq!(devices, vec![mac("AA:BB:CC:DD:EE:FF")]);
    assert!(!devices.contains(&mac("11:22:33:44:55:66")));
}

#[tokio::test]
async fn predictable_wireless_name_uses_station_dump() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost::default();
    host.set_devices("Station de:ad:be:ef:00:01 (on wlp2s0)\n");
    let config = NetworkConfig {
        interface: "wlp2s0".to_string(),
        ..NetworkConfig::default()
    };
    let fw = FirewallController::new(host.clone(), &config)
        .with_ip_forward_path(dir.path().join("ip_forward"));

    let devices = fw.connected_devices().await.unwrap();

    assert_eq!(devices, vec![mac("DE:AD:BE:EF:00:01")]);
    assert_eq!(host.calls(), vec!["iw dev wlp2s0 station dump".to_string()]);
}
