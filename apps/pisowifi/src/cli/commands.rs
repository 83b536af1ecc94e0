//! # CLI Command Implementations

use crate::api::{self, AppState};
use crate::client::GatewayClient;
use crate::config::{Config, LedgerConfig, LedgerKind};
use crate::hotspot;
use crate::metering::{Meter, current_timestamp};
use crate::network::controller_from_config;
use pisowifi_core::{Client, ClientHistory, Ledger, LedgerSummary, MacAddress, PisoError};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the ledger named by the config.
///
/// A database already held by a running server is reported as
/// `LedgerBusy` with a pointer to `--server`.
pub fn open_ledger(config: &LedgerConfig) -> Result<Ledger, PisoError> {
    match config.backend {
        LedgerKind::Redb => Ledger::with_redb(&config.path).map_err(|e| match e {
            PisoError::LedgerBusy(path) => PisoError::LedgerBusy(format!(
                "{}; while the gateway runs, use --server http://<gateway>:<port>",
                path
            )),
            other => other,
        }),
        LedgerKind::Memory => {
            tracing::warn!("Using in-memory ledger; balances are lost on exit");
            Ok(Ledger::new())
        }
    }
}

fn parse_mac(raw: &str) -> Result<MacAddress, PisoError> {
    raw.trim().parse()
}

fn print_json<T: Serialize>(value: &T) -> Result<(), PisoError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| PisoError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

/// Seconds as `1h 02m 03s`.
fn format_duration(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, (seconds % 3600) / 60, seconds % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else {
        format!("{}m {:02}s", m, s)
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested"),
        Err(e) => tracing::error!("Cannot listen for Ctrl+C: {}", e),
    }
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Run the gateway until Ctrl+C.
pub async fn cmd_server(
    config: &Config,
    host: Option<&str>,
    port: Option<u16>,
) -> Result<(), PisoError> {
    let host = host.unwrap_or(config.server.host.as_str());
    let port = port.unwrap_or(config.server.port);

    let ledger = Arc::new(RwLock::new(open_ledger(&config.ledger)?));
    let network = controller_from_config(&config.network);
    network.setup().await?;

    let meter = Meter::new(
        Arc::clone(&ledger),
        Arc::clone(&network),
        config.metering.check_interval_secs,
    );
    meter.reconcile().await?;

    println!("PisoWiFi Gateway Starting...");
    println!();
    println!("Configuration:");
    println!("  Listen:    {}:{}", host, port);
    println!("  Mode:      {:?}", config.network.mode);
    println!("  Interface: {}", config.network.interface);
    println!("  Ledger:    {:?} ({:?})", config.ledger.path, config.ledger.backend);
    println!("  Rate:      {} minute(s) per peso", config.pricing.minutes_per_peso);
    println!("  Tick:      {}s", config.metering.check_interval_secs);
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let (stop_tx, stop_rx) = watch::channel(false);
    let metering = meter.spawn(
        config.metering.interval(),
        config.metering.backoff(),
        stop_rx,
    );

    let state = AppState::new(ledger, network, config.pricing.tariff());
    let addr = format!("{}:{}", host, port);
    let served = api::run_server(&addr, state, shutdown_signal()).await;

    let _ = stop_tx.send(true);
    if let Err(e) = metering.await {
        tracing::warn!("Metering task ended abnormally: {}", e);
    }
    served
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show ledger totals.
pub fn cmd_status(config: &Config, json_mode: bool) -> Result<(), PisoError> {
    let ledger = open_ledger(&config.ledger)?;
    let summary = LedgerSummary::from_ledger(&ledger)?;

    if json_mode {
        return print_json(&serde_json::json!({
            "database": config.ledger.path.to_string_lossy(),
            "mode": config.network.mode,
            "summary": summary,
        }));
    }

    println!("PisoWiFi Ledger Status");
    println!("======================");
    println!("Database: {:?}", config.ledger.path);
    println!();
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &LedgerSummary) {
    println!("Clients:      {}", summary.client_count);
    println!("  Active:     {}", summary.active_count);
    println!("  Blocked:    {}", summary.blocked_count);
    println!("  Inactive:   {}", summary.inactive_count);
    println!();
    println!("Collected:    {} peso(s)", summary.total_amount);
    println!("Minutes sold: {}", summary.total_minutes);
    println!("Time used:    {}", format_duration(summary.total_seconds_deducted));
    println!("Outstanding:  {}", format_duration(summary.outstanding_seconds));
}

// =============================================================================
// BALANCE / ADD TIME
// =============================================================================

/// Show one device's remaining time.
pub fn cmd_balance(config: &Config, json_mode: bool, mac: &str) -> Result<(), PisoError> {
    let mac = parse_mac(mac)?;
    let balance = open_ledger(&config.ledger)?.check_balance(mac)?;

    if json_mode {
        return print_json(&api::BalanceResponse::new(mac, balance));
    }
    println!("{}  {}", mac, format_duration(balance.seconds()));
    Ok(())
}

/// Credit a top-up. The firewall is left to the running meter.
pub fn cmd_add_time(
    config: &Config,
    json_mode: bool,
    mac: &str,
    amount: u64,
) -> Result<(), PisoError> {
    let mac = parse_mac(mac)?;
    let minutes = config.pricing.tariff().quote(amount)?;
    let mut ledger = open_ledger(&config.ledger)?;
    let client = ledger.add_time(mac, amount, minutes, current_timestamp())?;
    tracing::info!(%mac, amount, minutes, "Added time from console");

    if json_mode {
        return print_json(&serde_json::json!({
            "mac_address": mac.to_string(),
            "minutes_added": minutes,
            "balance_seconds": client.balance.seconds(),
        }));
    }
    print_added(&mac.to_string(), minutes, client.balance.seconds());
    Ok(())
}

fn print_added(mac: &str, minutes: u64, balance_seconds: u64) {
    println!(
        "Added {} minute(s) to {}; balance now {}",
        minutes,
        mac,
        format_duration(balance_seconds)
    );
}

// =============================================================================
// CLIENTS / HISTORY
// =============================================================================

/// List every client.
pub fn cmd_clients(config: &Config, json_mode: bool) -> Result<(), PisoError> {
    let clients = open_ledger(&config.ledger)?.clients()?;

    if json_mode {
        return print_json(&clients);
    }
    print_clients(&clients);
    Ok(())
}

fn print_clients(clients: &[Client]) {
    if clients.is_empty() {
        println!("No clients yet");
        return;
    }

    println!("{:<6} {:<18} {:<9} {:>12}", "ID", "MAC", "STATUS", "BALANCE");
    for c in clients {
        println!(
            "{:<6} {:<18} {:<9} {:>12}",
            c.id.0,
            c.mac.to_string(),
            c.status.name(),
            format_duration(c.balance.seconds())
        );
    }
}

/// Show one client's top-ups and deductions.
pub fn cmd_history(config: &Config, json_mode: bool, mac: &str) -> Result<(), PisoError> {
    let mac = parse_mac(mac)?;
    let history = open_ledger(&config.ledger)?.history(mac)?;

    if json_mode {
        return print_json(&history);
    }
    print_history(&history);
    Ok(())
}

fn print_history(history: &ClientHistory) {
    let client = &history.client;
    println!("Client #{} {}", client.id.0, client.mac);
    println!("Status:  {}", client.status);
    println!("Balance: {}", format_duration(client.balance.seconds()));
    println!();
    println!("Top-ups ({}):", history.transactions.len());
    for t in &history.transactions {
        println!("  t={:<12} {:>5} peso(s)  +{} min", t.at.0, t.amount, t.minutes);
    }
    println!("Deductions ({}):", history.deductions.len());
    for d in &history.deductions {
        println!("  t={:<12} -{}s", d.at.0, d.seconds);
    }
}

// =============================================================================
// REMOTE COMMANDS (--server)
// =============================================================================

/// `status` against a running gateway.
pub async fn remote_status(client: &GatewayClient, json_mode: bool) -> Result<(), PisoError> {
    let status = client.status().await?;

    if json_mode {
        return print_json(&status);
    }

    println!("PisoWiFi Gateway Status");
    println!("=======================");
    println!("Gateway:  {}", client.base_url());
    match status.connected_devices {
        Some(n) => println!("Devices:  {} connected", n),
        None => println!("Devices:  unavailable"),
    }
    println!();
    print_summary(&status.summary);
    Ok(())
}

/// `balance` against a running gateway.
pub async fn remote_balance(
    client: &GatewayClient,
    json_mode: bool,
    mac: &str,
) -> Result<(), PisoError> {
    let balance = client.balance(parse_mac(mac)?).await?;

    if json_mode {
        return print_json(&balance);
    }
    println!("{}  {}", balance.mac_address, format_duration(balance.balance_seconds));
    Ok(())
}

/// `add-time` against a running gateway, which also lifts the block.
pub async fn remote_add_time(
    client: &GatewayClient,
    json_mode: bool,
    mac: &str,
    amount: u64,
) -> Result<(), PisoError> {
    let added = client.add_time(parse_mac(mac)?, amount).await?;

    if json_mode {
        return print_json(&added);
    }
    print_added(&added.mac_address, added.minutes_added, added.balance_seconds);
    if !added.unblocked {
        println!("Firewall not updated yet; the meter will retry");
    }
    Ok(())
}

/// `clients` against a running gateway.
pub async fn remote_clients(client: &GatewayClient, json_mode: bool) -> Result<(), PisoError> {
    let clients = client.clients().await?.clients;

    if json_mode {
        return print_json(&clients);
    }
    print_clients(&clients);
    Ok(())
}

/// `history` against a running gateway.
pub async fn remote_history(
    client: &GatewayClient,
    json_mode: bool,
    mac: &str,
) -> Result<(), PisoError> {
    let history = client.history(parse_mac(mac)?).await?;

    if json_mode {
        return print_json(&history);
    }
    print_history(&history);
    Ok(())
}

// =============================================================================
// HOTSPOT COMMAND
// =============================================================================

/// Render hostapd / dnsmasq configs into `output_dir`.
pub fn cmd_hotspot(config: &Config, json_mode: bool, output_dir: &Path) -> Result<(), PisoError> {
    let written = hotspot::write_configs(output_dir, &config.hotspot, &config.network)?;

    if json_mode {
        let paths: Vec<String> = written
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        return print_json(&serde_json::json!({ "written": paths }));
    }
    for path in written {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create a fresh ledger database. When `config_path` names a missing file,
/// the default configuration is written there too.
pub fn cmd_init(
    config_path: Option<&Path>,
    database: Option<&Path>,
    force: bool,
) -> Result<(), PisoError> {
    let mut config = match config_path {
        Some(path) if path.exists() => Config::from_file(path)?,
        Some(path) => {
            let text = toml::to_string_pretty(&Config::default())
                .map_err(|e| PisoError::SerializationError(e.to_string()))?;
            std::fs::write(path, text).map_err(|e| {
                PisoError::IoError(format!("Cannot write '{}': {}", path.display(), e))
            })?;
            println!("Wrote default configuration to {:?}", path);
            Config::default()
        }
        None => Config::default(),
    };
    if let Some(db) = database {
        config.ledger.path = db.to_path_buf();
    }

    let db_path = &config.ledger.path;
    if db_path.exists() {
        if !force {
            return Err(PisoError::IoError(format!(
                "Database {:?} already exists. Use --force to overwrite.",
                db_path
            )));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| PisoError::IoError(format!("Cannot remove {:?}: {}", db_path, e)))?;
    }

    let _ledger = Ledger::with_redb(db_path)?;
    println!("Initialized new ledger at {:?}", db_path);
    Ok(())
}
