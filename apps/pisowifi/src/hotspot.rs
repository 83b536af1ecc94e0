//! # Hotspot Templates
//!
//! Renders `hostapd.conf` and `dnsmasq.conf` for the access point from the
//! `[hotspot]` config section. dnsmasq hands out leases and forwards DNS to
//! the configured upstream resolvers; unpaid clients reach the portal
//! through the firewall's HTTP redirect, not through DNS.

use crate::config::{HotspotConfig, NetworkConfig};
use pisowifi_core::PisoError;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const HOSTAPD_FILE: &str = "hostapd.conf";
pub const DNSMASQ_FILE: &str = "dnsmasq.conf";

/// hostapd configuration for `interface`.
///
/// Open network without a passphrase, WPA2-PSK (CCMP) with one.
pub fn render_hostapd(hotspot: &HotspotConfig, network: &NetworkConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "interface={}", network.interface);
    let _ = writeln!(out, "driver=nl80211");
    let _ = writeln!(out, "ssid={}", hotspot.ssid);
    let _ = writeln!(out, "country_code={}", hotspot.country_code);
    let _ = writeln!(out, "hw_mode=g");
    let _ = writeln!(out, "channel={}", hotspot.channel);
    let _ = writeln!(out, "macaddr_acl=0");
    let _ = writeln!(out, "ignore_broadcast_ssid=0");

    match &hotspot.passphrase {
        Some(passphrase) => {
            let _ = writeln!(out, "auth_algs=1");
            let _ = writeln!(out, "wpa=2");
            let _ = writeln!(out, "wpa_key_mgmt=WPA-PSK");
            let _ = writeln!(out, "rsn_pairwise=CCMP");
            let _ = writeln!(out, "wpa_passphrase={}", passphrase);
        }
        None => {
            let _ = writeln!(out, "auth_algs=1");
            let _ = writeln!(out, "wpa=0");
        }
    }
    out
}

/// dnsmasq configuration: DHCP for the client range and a forwarding
/// resolver on the gateway.
pub fn render_dnsmasq(hotspot: &HotspotConfig, network: &NetworkConfig) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "interface={}", network.interface);
    let _ = writeln!(out, "bind-interfaces");
    let _ = writeln!(
        out,
        "dhcp-range={},{},255.255.255.0,{}",
        hotspot.dhcp_start, hotspot.dhcp_end, hotspot.lease_time
    );
    let _ = writeln!(out, "dhcp-option=3,{}", hotspot.gateway);
    let _ = writeln!(out, "dhcp-option=6,{}", hotspot.gateway);
    let _ = writeln!(out, "no-resolv");
    for server in &hotspot.upstream_dns {
        let _ = writeln!(out, "server={}", server);
    }
    out
}

/// Write both files into `dir`, creating it if needed. Returns the paths.
pub fn write_configs(
    dir: &Path,
    hotspot: &HotspotConfig,
    network: &NetworkConfig,
) -> Result<Vec<PathBuf>, PisoError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| PisoError::IoError(format!("cannot create {}: {}", dir.display(), e)))?;

    let files = [
        (HOSTAPD_FILE, render_hostapd(hotspot, network)),
        (DNSMASQ_FILE, render_dnsmasq(hotspot, network)),
    ];

    let mut written = Vec::with_capacity(files.len());
    for (name, body) in files {
        let path = dir.join(name);
        std::fs::write(&path, body)
            .map_err(|e| PisoError::IoError(format!("cannot write {}: {}", path.display(), e)))?;
        written.push(path);
    }
    Ok(written)
}
