//! # PisoWiFi - Coin-Operated Hotspot Gateway
//!
//! The gateway daemon binary.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    apps/pisowifi (THE BINARY)                   │
//! │                                                                 │
//! │  ┌─────────────┐    ┌─────────────┐    ┌──────────────────┐    │
//! │  │   CLI       │    │  Portal API │    │  Metering Loop   │    │
//! │  │  (clap)     │    │   (axum)    │    │  (tokio task)    │    │
//! │  └──────┬──────┘    └──────┬──────┘    └────────┬─────────┘    │
//! │         │                  │                    │              │
//! │         └──────────────────┼────────────────────┘              │
//! │                            ▼                                   │
//! │       ┌────────────────┐        ┌─────────────────────┐        │
//! │       │ pisowifi-core  │        │ Network Controller  │        │
//! │       │ (THE LEDGER)   │        │ (iptables/iw/arp)   │        │
//! │       └────────────────┘        └─────────────────────┘        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Run the gateway
//! pisowifi --config /etc/pisowifi.toml server
//!
//! # Console operations
//! pisowifi add-time --mac 00:11:22:33:44:55 --amount 5
//! pisowifi clients
//! ```

use clap::Parser;
use pisowifi::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // PISOWIFI_LOG_FORMAT=json switches to machine-parseable output.
    let log_format = std::env::var("PISOWIFI_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "pisowifi=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  ┌─┐┬┌─┐┌─┐┬ ┬┬┌─┐┬
  ├─┘│└─┐│ ││││││├┤ │
  ┴  ┴└─┘└─┘└┴┘┴└  ┴

  PisoWiFi Gateway v{}

  Insert coin - get online
"#,
        env!("CARGO_PKG_VERSION")
    );
}
