//! # API Request/Response Types
//!
//! JSON structures for the portal API, plus the error type handlers return.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pisowifi_core::{AccessStatus, Balance, Client, LedgerSummary, MacAddress, PisoError};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// STATUS RESPONSE
// =============================================================================

/// Gateway status: ledger totals plus the live device count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub summary: LedgerSummary,
    /// `None` when the access point could not be polled.
    pub connected_devices: Option<usize>,
    pub persistent: bool,
}

// =============================================================================
// DEVICES / CLIENTS
// =============================================================================

/// One connected device as shown on the portal index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceJson {
    pub mac_address: String,
    pub balance_seconds: u64,
    pub balance_minutes: u64,
    pub status: AccessStatus,
}

impl DeviceJson {
    pub fn new(mac: MacAddress, balance: Balance, status: AccessStatus) -> Self {
        Self {
            mac_address: mac.to_string(),
            balance_seconds: balance.seconds(),
            balance_minutes: balance.minutes(),
            status,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevicesResponse {
    pub devices: Vec<DeviceJson>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientsResponse {
    pub clients: Vec<Client>,
}

// =============================================================================
// BALANCE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub mac_address: String,
    pub balance_seconds: u64,
    pub balance_minutes: u64,
}

impl BalanceResponse {
    pub fn new(mac: MacAddress, balance: Balance) -> Self {
        Self {
            mac_address: mac.to_string(),
            balance_seconds: balance.seconds(),
            balance_minutes: balance.minutes(),
        }
    }
}

// =============================================================================
// ADD TIME
// =============================================================================

/// Coin top-up request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTimeRequest {
    pub mac_address: String,
    /// Pesos inserted.
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTimeResponse {
    pub success: bool,
    pub mac_address: String,
    pub minutes_added: u64,
    pub balance_seconds: u64,
    /// False when the firewall unblock failed; the meter retries it.
    pub unblocked: bool,
}

// =============================================================================
// MANUAL BLOCK / UNBLOCK
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub mac_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessResponse {
    pub success: bool,
    pub mac_address: String,
    pub status: AccessStatus,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body shared by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

/// A failed request: status code plus message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<PisoError> for ApiError {
    fn from(e: PisoError) -> Self {
        let status = match &e {
            PisoError::InvalidMacAddress(_) | PisoError::InvalidAmount(_) => {
                StatusCode::BAD_REQUEST
            }
            PisoError::ClientNotFound(_) => StatusCode::NOT_FOUND,
            PisoError::CommandFailed(_) | PisoError::GatewayError(..) => StatusCode::BAD_GATEWAY,
            PisoError::LedgerBusy(_) => StatusCode::SERVICE_UNAVAILABLE,
            PisoError::SerializationError(_)
            | PisoError::IoError(_)
            | PisoError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                success: false,
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Parse a MAC from a path or body field.
pub fn parse_mac(raw: &str) -> Result<MacAddress, ApiError> {
    raw.trim().parse::<MacAddress>().map_err(ApiError::from)
}
