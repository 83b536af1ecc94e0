//! # Gateway Configuration
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. Built-in defaults (a development-friendly `wlan0` gateway)
//! 2. A TOML file (`--config` or `PISOWIFI_CONFIG`)
//! 3. Environment overrides:
//!    - `PISOWIFI_ENV`: `development` or `production`
//!    - `FLASK_ENV=development`: legacy switch for development mode
//!    - `WIFI_INTERFACE`: wireless interface name
//!
//! API knobs (`PISOWIFI_API_KEY`, `PISOWIFI_RATE_LIMIT`,
//! `PISOWIFI_CORS_ORIGINS`) are read by the api module at router build time.

use pisowifi_core::{
    PisoError, Tariff,
    primitives::{
        DEFAULT_CHECK_INTERVAL_SECS, DEFAULT_ERROR_BACKOFF_SECS, DEFAULT_MINUTES_PER_PESO,
        MAX_TOPUP_AMOUNT,
    },
};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "PISOWIFI_CONFIG";

// =============================================================================
// SECTIONS
// =============================================================================

/// Whether the gateway drives the real firewall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    /// Log instead of running commands; report a fixed device list.
    #[default]
    Development,
    /// Run iptables / iw / arp for real.
    Production,
}

/// Which ledger backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    #[default]
    Redb,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub mode: NetworkMode,
    /// Interface clients associate with.
    pub interface: String,
    /// Interface facing the internet (NAT masquerade).
    pub uplink: String,
    /// Dedicated iptables chain for per-MAC DROP rules.
    pub chain: String,
    /// Portal that blocked clients' plain HTTP is redirected to; `None`
    /// leaves blocked clients with dropped traffic only.
    pub portal: Option<SocketAddrV4>,
    pub command_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: NetworkMode::Development,
            interface: "wlan0".to_string(),
            uplink: "eth0".to_string(),
            chain: "PISOWIFI".to_string(),
            portal: Some(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 5000)),
            command_timeout_secs: 10,
        }
    }
}

impl NetworkConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeteringConfig {
    /// Seconds between ticks; also the seconds charged per tick.
    pub check_interval_secs: u64,
    pub error_backoff_secs: u64,
}

impl Default for MeteringConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            error_backoff_secs: DEFAULT_ERROR_BACKOFF_SECS,
        }
    }
}

impl MeteringConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub minutes_per_peso: u64,
    pub max_amount: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            minutes_per_peso: DEFAULT_MINUTES_PER_PESO,
            max_amount: MAX_TOPUP_AMOUNT,
        }
    }
}

impl PricingConfig {
    pub fn tariff(&self) -> Tariff {
        Tariff {
            minutes_per_peso: self.minutes_per_peso,
            max_amount: self.max_amount,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub backend: LedgerKind,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("pisowifi.db"),
            backend: LedgerKind::Redb,
        }
    }
}

/// Access point and DHCP settings rendered into hostapd / dnsmasq configs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotspotConfig {
    pub ssid: String,
    /// WPA2 passphrase; `None` runs an open network (the usual captive setup).
    pub passphrase: Option<String>,
    pub channel: u8,
    pub country_code: String,
    pub gateway: Ipv4Addr,
    pub dhcp_start: Ipv4Addr,
    pub dhcp_end: Ipv4Addr,
    pub lease_time: String,
    /// Resolvers dnsmasq forwards client queries to.
    pub upstream_dns: Vec<Ipv4Addr>,
}

impl Default for HotspotConfig {
    fn default() -> Self {
        Self {
            ssid: "PisoWiFi".to_string(),
            passphrase: None,
            channel: 6,
            country_code: "PH".to_string(),
            gateway: Ipv4Addr::new(10, 0, 0, 1),
            dhcp_start: Ipv4Addr::new(10, 0, 0, 10),
            dhcp_end: Ipv4Addr::new(10, 0, 0, 250),
            lease_time: "12h".to_string(),
            upstream_dns: vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(8, 8, 8, 8)],
        }
    }
}

// =============================================================================
// CONFIG
// =============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub metering: MeteringConfig,
    pub pricing: PricingConfig,
    pub ledger: LedgerConfig,
    pub hotspot: HotspotConfig,
}

impl Config {
    /// Load configuration from `path` (or `PISOWIFI_CONFIG`), apply process
    /// environment overrides, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, PisoError> {
        let env_path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file. Missing sections and fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, PisoError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            PisoError::ConfigError(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    /// Parse TOML text.
    pub fn from_toml(raw: &str) -> Result<Self, PisoError> {
        toml::from_str(raw).map_err(|e| PisoError::ConfigError(e.to_string()))
    }

    /// Apply environment overrides through `lookup` (the process environment
    /// in production, a map in tests).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if lookup("FLASK_ENV").as_deref() == Some("development") {
            self.network.mode = NetworkMode::Development;
        }
        match lookup("PISOWIFI_ENV").as_deref() {
            Some("development") => self.network.mode = NetworkMode::Development,
            Some("production") => self.network.mode = NetworkMode::Production,
            Some(other) => {
                tracing::warn!("Ignoring unknown PISOWIFI_ENV value '{}'", other);
            }
            None => {}
        }
        if let Some(interface) = lookup("WIFI_INTERFACE").filter(|s| !s.is_empty()) {
            self.network.interface = interface;
        }
    }

    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<(), PisoError> {
        let fail = |msg: String| -> Result<(), PisoError> { Err(PisoError::ConfigError(msg)) };

        if self.server.port == 0 {
            return fail("server.port must be non-zero".to_string());
        }
        if self.metering.check_interval_secs == 0 {
            return fail("metering.check_interval_secs must be at least 1".to_string());
        }
        if self.pricing.minutes_per_peso == 0 {
            return fail("pricing.minutes_per_peso must be at least 1".to_string());
        }
        if self.network.interface.is_empty() || self.network.chain.is_empty() {
            return fail("network.interface and network.chain must be set".to_string());
        }
        if self.network.command_timeout_secs == 0 {
            return fail("network.command_timeout_secs must be at least 1".to_string());
        }

        let hotspot = &self.hotspot;
        if hotspot.ssid.is_empty() || hotspot.ssid.len() > 32 {
            return fail("hotspot.ssid must be 1-32 bytes".to_string());
        }
        if let Some(pass) = &hotspot.passphrase {
            if !(8..=63).contains(&pass.len()) {
                return fail("hotspot.passphrase must be 8-63 characters".to_string());
            }
        }
        // Values are written one per line into hostapd / dnsmasq files.
        let rendered = [
            ("hotspot.ssid", Some(hotspot.ssid.as_str())),
            ("hotspot.passphrase", hotspot.passphrase.as_deref()),
            ("hotspot.country_code", Some(hotspot.country_code.as_str())),
            ("hotspot.lease_time", Some(hotspot.lease_time.as_str())),
            ("network.interface", Some(self.network.interface.as_str())),
        ];
        for (name, value) in rendered {
            if value.is_some_and(|v| v.chars().any(char::is_control)) {
                return fail(format!("{} must not contain control characters", name));
            }
        }
        if hotspot.upstream_dns.is_empty() {
            return fail("hotspot.upstream_dns must list at least one resolver".to_string());
        }
        let subnet = |ip: Ipv4Addr| {
            let [a, b, c, _] = ip.octets();
            [a, b, c]
        };
        if subnet(hotspot.dhcp_start) != subnet(hotspot.gateway)
            || subnet(hotspot.dhcp_end) != subnet(hotspot.gateway)
        {
            return fail("hotspot DHCP range must be inside the gateway /24".to_string());
        }
        if hotspot.dhcp_start > hotspot.dhcp_end {
            return fail("hotspot.dhcp_start must not be after dhcp_end".to_string());
        }
        if (hotspot.dhcp_start..=hotspot.dhcp_end).contains(&hotspot.gateway) {
            return fail("hotspot gateway must be outside the DHCP range".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.network.interface, "wlan0");
        assert_eq!(config.metering.check_interval_secs, 30);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [network]
            mode = "production"
            interface = "wlan1"

            [pricing]
            minutes_per_peso = 5
            "#,
        )
        .expect("parse");
        assert_eq!(config.network.mode, NetworkMode::Production);
        assert_eq!(config.network.interface, "wlan1");
        assert_eq!(config.network.uplink, "eth0");
        assert_eq!(config.pricing.tariff().quote(2).expect("quote"), 10);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            Config::from_toml("[server]\nport = \"five\""),
            Err(PisoError::ConfigError(_))
        ));
    }

    #[test]
    fn env_overrides_mode_and_interface() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("PISOWIFI_ENV", "production"),
            ("WIFI_INTERFACE", "wlan2"),
        ]));
        assert_eq!(config.network.mode, NetworkMode::Production);
        assert_eq!(config.network.interface, "wlan2");
    }

    #[test]
    fn flask_env_selects_development() {
        let mut config = Config::default();
        config.network.mode = NetworkMode::Production;
        config.apply_env(env(&[("FLASK_ENV", "development")]));
        assert_eq!(config.network.mode, NetworkMode::Development);
    }

    #[test]
    fn validation_rejects_bad_hotspot() {
        let mut config = Config::default();
        config.hotspot.passphrase = Some("short".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.hotspot.dhcp_end = Ipv4Addr::new(192, 168, 1, 20);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.hotspot.gateway = Ipv4Addr::new(10, 0, 0, 50);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_control_characters() {
        let mut config = Config::default();
        config.hotspot.ssid = "Free\nwpa=0".to_string();
        let err = config.validate().expect_err("newline in ssid");
        assert!(err.to_string().contains("hotspot.ssid"));

        let mut config = Config::default();
        config.hotspot.passphrase = Some("secret12\rchannel=1".to_string());
        assert!(matches!(config.validate(), Err(PisoError::ConfigError(_))));

        let mut config = Config::default();
        config.hotspot.ssid = "Piso\tWiFi".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.hotspot.ssid = "Kape ni Aling Nena".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn portal_and_upstream_dns_parse_from_toml() {
        let config = Config::from_toml(
            r#"
            [network]
            portal = "10.0.0.1:8080"

            [hotspot]
            upstream_dns = ["9.9.9.9"]
            "#,
        )
        .expect("parse");
        assert_eq!(
            config.network.portal,
            Some(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 8080))
        );
        assert_eq!(config.hotspot.upstream_dns, vec![Ipv4Addr::new(9, 9, 9, 9)]);

        let mut config = Config::default();
        config.hotspot.upstream_dns.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_zero_interval() {
        let mut config = Config::default();
        config.metering.check_interval_secs = 0;
        assert!(matches!(config.validate(), Err(PisoError::ConfigError(_))));
    }
}
