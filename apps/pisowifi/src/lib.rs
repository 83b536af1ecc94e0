//! # PisoWiFi Gateway Library
//!
//! The async half of the gateway: configuration, the host network
//! controller, the metering loop, hotspot templates, the portal API, its HTTP
//! client and the CLI. All balance bookkeeping lives in `pisowifi-core`.

pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod hotspot;
pub mod metering;
pub mod network;
