//! # API Endpoint Handlers
//!
//! Ledger reads take the read lock; writes take the write lock only around
//! the ledger call, never across a firewall command.

use super::{
    AppState, portal,
    types::{
        AccessRequest, AccessResponse, AddTimeRequest, AddTimeResponse, ApiError,
        BalanceResponse, ClientsResponse, DeviceJson, DevicesResponse, HealthResponse,
        StatusResponse, parse_mac,
    },
};
use crate::metering::current_timestamp;
use axum::{
    Form, Json,
    extract::{FromRequest, Path, Request, State, rejection::JsonRejection},
    http::header,
    response::{Html, IntoResponse, Redirect, Response},
};
use pisowifi_core::{AccessStatus, ClientHistory, LedgerSummary, MacAddress, Timestamp};

// =============================================================================
// HEALTH / STATUS
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

/// Ledger totals and the live device count.
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let connected_devices = match state.network.connected_devices().await {
        Ok(devices) => Some(devices.len()),
        Err(e) => {
            tracing::warn!("Device poll failed during status: {}", e);
            None
        }
    };

    let ledger = state.ledger.read().await;
    Ok(Json(StatusResponse {
        summary: LedgerSummary::from_ledger(&ledger)?,
        connected_devices,
        persistent: ledger.is_persistent(),
    }))
}

// =============================================================================
// DEVICES / CLIENTS
// =============================================================================

/// Connected devices joined with their ledger rows.
async fn connected_device_rows(state: &AppState) -> Result<Vec<DeviceJson>, ApiError> {
    let macs = state.network.connected_devices().await?;

    let ledger = state.ledger.read().await;
    let mut devices = Vec::with_capacity(macs.len());
    for mac in macs {
        let status = ledger.client(mac)?.map(|c| c.status).unwrap_or_default();
        devices.push(DeviceJson::new(mac, ledger.check_balance(mac)?, status));
    }
    Ok(devices)
}

/// The portal page clients land on.
pub async fn index_handler(State(state): State<AppState>) -> Html<String> {
    let devices = match connected_device_rows(&state).await {
        Ok(devices) => Some(devices),
        Err(e) => {
            tracing::warn!("Portal page without device list: {}", e.message);
            None
        }
    };
    Html(portal::render_index(devices.as_deref(), &state.tariff))
}

/// Connected devices with their balances.
pub async fn devices_handler(
    State(state): State<AppState>,
) -> Result<Json<DevicesResponse>, ApiError> {
    let devices = connected_device_rows(&state).await?;
    Ok(Json(DevicesResponse { devices }))
}

/// Every client the ledger knows.
pub async fn clients_handler(
    State(state): State<AppState>,
) -> Result<Json<ClientsResponse>, ApiError> {
    let clients = state.ledger.read().await.clients()?;
    Ok(Json(ClientsResponse { clients }))
}

// =============================================================================
// BALANCE / HISTORY
// =============================================================================

/// Balance of one MAC; zero when unknown.
pub async fn balance_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let mac = parse_mac(&raw)?;
    let balance = state.ledger.read().await.check_balance(mac)?;
    Ok(Json(BalanceResponse::new(mac, balance)))
}

/// Client row with its top-ups and deductions.
pub async fn history_handler(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<ClientHistory>, ApiError> {
    let mac = parse_mac(&raw)?;
    let history = state.ledger.read().await.history(mac)?;
    Ok(Json(history))
}

// =============================================================================
// ADD TIME
// =============================================================================

/// Credit a coin top-up and open the firewall for the client.
///
/// Accepts a JSON body (coin acceptor, CLI) or a form post from the portal
/// page; form posts are answered with a redirect back to `/`.
pub async fn add_time_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ApiError> {
    let is_form = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));

    if is_form {
        let Form(payload) = Form::<AddTimeRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        credit(&state, payload).await?;
        Ok(Redirect::to("/").into_response())
    } else {
        let Json(payload) = Json::<AddTimeRequest>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        Ok(Json(credit(&state, payload).await?).into_response())
    }
}

/// Commit the credit, then try to open the firewall.
///
/// Nothing after the commit fails the request: a retried top-up would
/// credit the client twice. The meter lifts a leftover block on its next
/// tick once it sees a funded client.
async fn credit(state: &AppState, request: AddTimeRequest) -> Result<AddTimeResponse, ApiError> {
    let mac = parse_mac(&request.mac_address)?;
    let minutes = state.tariff.quote(request.amount)?;
    let now = current_timestamp();

    let client = state
        .ledger
        .write()
        .await
        .add_time(mac, request.amount, minutes, now)?;
    tracing::info!(%mac, amount = request.amount, minutes, "Added time");

    Ok(AddTimeResponse {
        success: true,
        mac_address: mac.to_string(),
        minutes_added: minutes,
        balance_seconds: client.balance.seconds(),
        unblocked: open_for(state, mac, now).await,
    })
}

/// Unblock `mac` and record it as active. Returns whether both happened.
async fn open_for(state: &AppState, mac: MacAddress, now: Timestamp) -> bool {
    if let Err(e) = state.network.unblock(mac).await {
        tracing::warn!(%mac, "Credit saved but unblock failed: {}", e);
        return false;
    }
    match state
        .ledger
        .write()
        .await
        .set_status(mac, AccessStatus::Active, now)
    {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(%mac, "Credit saved and unblocked, but status not recorded: {}", e);
            false
        }
    }
}

// =============================================================================
// MANUAL OVERRIDE
// =============================================================================

/// Block a client now, regardless of balance.
pub async fn block_handler(
    State(state): State<AppState>,
    payload: Result<Json<AccessRequest>, JsonRejection>,
) -> Result<Json<AccessResponse>, ApiError> {
    set_access(state, payload, AccessStatus::Blocked).await
}

/// Lift a block now. A client with no balance is blocked again on the
/// next tick.
pub async fn unblock_handler(
    State(state): State<AppState>,
    payload: Result<Json<AccessRequest>, JsonRejection>,
) -> Result<Json<AccessResponse>, ApiError> {
    set_access(state, payload, AccessStatus::Active).await
}

async fn set_access(
    state: AppState,
    payload: Result<Json<AccessRequest>, JsonRejection>,
    status: AccessStatus,
) -> Result<Json<AccessResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let mac = parse_mac(&request.mac_address)?;

    match status {
        AccessStatus::Blocked => state.network.block(mac).await?,
        AccessStatus::Active | AccessStatus::Inactive => state.network.unblock(mac).await?,
    }
    let client = state
        .ledger
        .write()
        .await
        .set_status(mac, status, current_timestamp())?;
    tracing::info!(%mac, status = %client.status, "Manual access override");

    Ok(Json(AccessResponse {
        success: true,
        mac_address: mac.to_string(),
        status: client.status,
    }))
}
