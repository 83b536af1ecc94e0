//! # PisoWiFi CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Set up the firewall, start metering and serve the portal
//! - `status` - Show ledger totals
//! - `balance` - Show one device's remaining time
//! - `add-time` - Credit a top-up from the console
//! - `clients` - List every client
//! - `history` - Show one client's top-ups and deductions
//! - `hotspot` - Render hostapd / dnsmasq configs
//! - `init` - Create a fresh ledger database
//!
//! The server holds the ledger database exclusively. While it runs, pass
//! `--server <URL>` to send `status`, `balance`, `add-time`, `clients` and
//! `history` through its portal API instead.

mod commands;

use crate::client::GatewayClient;
use crate::config::Config;
use clap::{Parser, Subcommand};
use pisowifi_core::PisoError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// PisoWiFi - coin-operated hotspot gateway
///
/// Meters connected devices against prepaid time and keeps the firewall in
/// step with each client's balance.
#[derive(Parser, Debug)]
#[command(name = "pisowifi")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// TOML configuration file (also PISOWIFI_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Ledger database path (overrides ledger.path)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Query a running gateway (e.g. http://10.0.0.1:5000) instead of
    /// opening the ledger file
    #[arg(short = 'S', long, global = true, value_name = "URL")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the gateway: firewall setup, metering loop and portal API
    Server {
        /// Host to bind to (overrides server.host)
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show ledger totals
    Status,

    /// Show the remaining time of one device
    Balance {
        /// Device MAC address
        #[arg(short, long)]
        mac: String,
    },

    /// Credit a top-up; with --server the gateway also lifts any block,
    /// otherwise the running meter does
    AddTime {
        /// Device MAC address
        #[arg(short, long)]
        mac: String,

        /// Pesos inserted
        #[arg(short, long)]
        amount: u64,
    },

    /// List every client in the ledger
    Clients,

    /// Show one client's top-ups and deductions
    History {
        /// Device MAC address
        #[arg(short, long)]
        mac: String,
    },

    /// Write hostapd.conf and dnsmasq.conf
    Hotspot {
        /// Directory to write into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Create a fresh ledger database (and the config file if missing)
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Resolve configuration for this invocation: file and env layers, then the
/// `--database` flag.
pub fn resolve_config(cli: &Cli) -> Result<Config, PisoError> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(db) = &cli.database {
        config.ledger.path = db.clone();
    }
    Ok(config)
}

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), PisoError> {
    let json_mode = cli.json_mode;

    if let Some(url) = cli.server.as_deref() {
        return execute_remote(&GatewayClient::from_env(url), cli.command, json_mode).await;
    }

    // `init` may be creating the config file, so it cannot load it first.
    if let Some(Commands::Init { force }) = cli.command {
        return cmd_init(cli.config.as_deref(), cli.database.as_deref(), force);
    }

    let config = resolve_config(&cli)?;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            cmd_server(&config, host.as_deref(), port).await
        }
        Some(Commands::Balance { mac }) => cmd_balance(&config, json_mode, &mac),
        Some(Commands::AddTime { mac, amount }) => cmd_add_time(&config, json_mode, &mac, amount),
        Some(Commands::Clients) => cmd_clients(&config, json_mode),
        Some(Commands::History { mac }) => cmd_history(&config, json_mode, &mac),
        Some(Commands::Hotspot { output_dir }) => cmd_hotspot(&config, json_mode, &output_dir),
        Some(Commands::Status | Commands::Init { .. }) | None => cmd_status(&config, json_mode),
    }
}

/// Run a command against a running gateway.
async fn execute_remote(
    client: &GatewayClient,
    command: Option<Commands>,
    json_mode: bool,
) -> Result<(), PisoError> {
    match command {
        Some(Commands::Balance { mac }) => remote_balance(client, json_mode, &mac).await,
        Some(Commands::AddTime { mac, amount }) => {
            remote_add_time(client, json_mode, &mac, amount).await
        }
        Some(Commands::Clients) => remote_clients(client, json_mode).await,
        Some(Commands::History { mac }) => remote_history(client, json_mode, &mac).await,
        Some(Commands::Status) | None => remote_status(client, json_mode).await,
        Some(Commands::Server { .. } | Commands::Hotspot { .. } | Commands::Init { .. }) => {
            Err(PisoError::ConfigError(
                "--server only applies to status, balance, add-time, clients and history"
                    .to_string(),
            ))
        }
    }
}
