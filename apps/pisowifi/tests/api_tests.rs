//! Integration tests for the PisoWiFi portal API.
//!
//! Uses axum-test to drive the router without binding a socket.

// Allow holding MutexGuard across await in auth tests - tests are serialized
// intentionally to avoid env var conflicts
#![allow(clippy::unwrap_used, clippy::panic, clippy::await_holding_lock)]

use async_trait::async_trait;
use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use pisowifi::api::{
    AccessResponse, AddTimeResponse, AppState, BalanceResponse, ClientsResponse, DevicesResponse,
    ErrorResponse, HealthResponse, StatusResponse, create_router,
};
use pisowifi::network::{NetworkController, SimulatedController};
use pisowifi_core::{
    AccessStatus, ClientHistory, Ledger, MacAddress, PisoError, Tariff, Timestamp,
};
use serde_json::json;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Mutex to serialize tests since some of them modify env vars.
static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

const PHONE: &str = "00:11:22:33:44:55";
const LAPTOP: &str = "AA:BB:CC:DD:EE:FF";

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Simulated controller whose firewall commands can be made to fail.
#[derive(Default)]
struct FlakyController {
    inner: SimulatedController,
    failing: AtomicBool,
}

impl FlakyController {
    fn fail(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PisoError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(PisoError::CommandFailed("iptables: resource busy".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl NetworkController for FlakyController {
    async fn setup(&self) -> Result<(), PisoError> {
        self.inner.setup().await
    }

    async fn block(&self, mac: MacAddress) -> Result<(), PisoError> {
        self.check()?;
        self.inner.block(mac).await
    }

    async fn unblock(&self, mac: MacAddress) -> Result<(), PisoError> {
        self.check()?;
        self.inner.unblock(mac).await
    }

    async fn connected_devices(&self) -> Result<Vec<MacAddress>, PisoError> {
        self.check()?;
        self.inner.connected_devices().await
    }
}

struct Harness {
    server: TestServer,
    ledger: Arc<RwLock<Ledger>>,
    network: Arc<FlakyController>,
    _guard: TestGuard,
}

/// Guard wrapper that holds the mutex and ensures cleanup on drop.
struct TestGuard {
    _guard: std::sync::MutexGuard<'static, ()>,
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
        unsafe { std::env::remove_var("PISOWIFI_API_KEY") };
    }
}

fn mac(s: &str) -> MacAddress {
    s.parse().unwrap()
}

/// Build a server over a fresh in-memory ledger. `api_key` enables auth.
fn harness(api_key: Option<&str>) -> Harness {
    let guard = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: Tests run sequentially under ENV_TEST_MUTEX, so no concurrent env access.
    unsafe {
        match api_key {
            Some(key) => std::env::set_var("PISOWIFI_API_KEY", key),
            None => std::env::remove_var("PISOWIFI_API_KEY"),
        }
    }

    let ledger = Arc::new(RwLock::new(Ledger::new()));
    let network = Arc::new(FlakyController::default());
    let dyn_network: Arc<dyn NetworkController> = network.clone();
    let state = AppState::new(Arc::clone(&ledger), dyn_network, Tariff::default());

    Harness {
        server: TestServer::new(create_router(state)).unwrap(),
        ledger,
        network,
        _guard: TestGuard { _guard: guard },
    }
}

// =============================================================================
// HEALTH / STATUS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness(None);

    let response = h.server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_status_counts_clients_and_devices() {
    let h = harness(None);
    h.ledger
        .write()
        .await
        .add_time(mac(PHONE), 2, 2, Timestamp(0))
        .unwrap();

    let response = h.server.get("/status").await;

    response.assert_status_ok();
    let status: StatusResponse = response.json();
    assert_eq!(status.summary.client_count, 1);
    assert_eq!(status.summary.total_amount, 2);
    assert_eq!(status.connected_devices, Some(2));
    assert!(!status.persistent);
}

#[tokio::test]
async fn test_status_survives_device_poll_failure() {
    let h = harness(None);
    h.network.fail(true);

    let response = h.server.get("/status").await;

    response.assert_status_ok();
    let status: StatusResponse = response.json();
    assert_eq!(status.connected_devices, None);
}

// =============================================================================
// DEVICES / CLIENTS
// =============================================================================

#[tokio::test]
async fn test_devices_lists_connected_with_balances() {
    let h = harness(None);
    h.ledger
        .write()
        .await
        .add_time(mac(LAPTOP), 1, 1, Timestamp(0))
        .unwrap();

    let response = h.server.get("/devices").await;

    response.assert_status_ok();
    let body: DevicesResponse = response.json();
    assert_eq!(body.devices.len(), 2);
    assert_eq!(body.devices[0].mac_address, PHONE);
    assert_eq!(body.devices[0].balance_seconds, 0);
    assert_eq!(body.devices[0].status, AccessStatus::Inactive);
    assert_eq!(body.devices[1].balance_minutes, 1);
}

#[tokio::test]
async fn test_portal_index_lists_devices_with_forms() {
    let h = harness(None);
    h.ledger
        .write()
        .await
        .add_time(mac(PHONE), 7, 7, Timestamp(0))
        .unwrap();

    let response = h.server.get("/").await;

    response.assert_status_ok();
    let page = response.text();
    assert!(page.contains("<td>00:11:22:33:44:55</td><td>7 min</td>"));
    assert!(page.contains(LAPTOP));
    assert_eq!(page.matches("action=\"/add_time\"").count(), 2);
}

#[tokio::test]
async fn test_portal_index_survives_device_poll_failure() {
    let h = harness(None);
    h.network.fail(true);

    let response = h.server.get("/").await;

    response.assert_status_ok();
    assert!(response.text().contains("Device list unavailable"));
}

#[tokio::test]
async fn test_devices_poll_failure_is_bad_gateway() {
    let h = harness(None);
    h.network.fail(true);

    let response = h.server.get("/devices").await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: ErrorResponse = response.json();
    assert!(!body.success);
}

#[tokio::test]
async fn test_clients_lists_ledger_rows() {
    let h = harness(None);
    {
        let mut ledger = h.ledger.write().await;
        ledger.add_time(mac(PHONE), 1, 1, Timestamp(0)).unwrap();
        ledger.add_time(mac(LAPTOP), 1, 1, Timestamp(1)).unwrap();
    }

    let body: ClientsResponse = h.server.get("/clients").await.json();
    assert_eq!(body.clients.len(), 2);
    assert_eq!(body.clients[0].mac, mac(PHONE));
}

// =============================================================================
// BALANCE / HISTORY
// =============================================================================

#[tokio::test]
async fn test_balance_of_unknown_device_is_zero() {
    let h = harness(None);

    let response = h.server.get("/balance/de-ad-be-ef-00-01").await;

    response.assert_status_ok();
    let body: BalanceResponse = response.json();
    assert_eq!(body.mac_address, "DE:AD:BE:EF:00:01");
    assert_eq!(body.balance_seconds, 0);
}

#[tokio::test]
async fn test_balance_rejects_bad_mac() {
    let h = harness(None);

    let response = h.server.get("/balance/not-a-mac").await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_history_unknown_is_not_found() {
    let h = harness(None);

    let response = h.server.get(&format!("/history/{}", PHONE)).await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_history_after_top_up() {
    let h = harness(None);
    h.server
        .post("/add_time")
        .json(&json!({"mac_address": PHONE, "amount": 5}))
        .await
        .assert_status_ok();

    let response = h.server.get(&format!("/history/{}", PHONE)).await;

    response.assert_status_ok();
    let history: ClientHistory = response.json();
    assert_eq!(history.transactions.len(), 1);
    assert_eq!(history.transactions[0].amount, 5);
    assert_eq!(history.transactions[0].minutes, 5);
    assert!(history.deductions.is_empty());
}

// =============================================================================
// ADD TIME
// =============================================================================

#[tokio::test]
async fn test_add_time_credits_and_unblocks() {
    let h = harness(None);
    h.network.inner.block(mac(PHONE)).await.unwrap();

    let response = h
        .server
        .post("/add_time")
        .json(&json!({"mac_address": "00-11-22-33-44-55", "amount": 3}))
        .await;

    response.assert_status_ok();
    let body: AddTimeResponse = response.json();
    assert!(body.success);
    assert!(body.unblocked);
    assert_eq!(body.minutes_added, 3);
    assert_eq!(body.balance_seconds, 180);
    assert!(!h.network.inner.is_blocked(mac(PHONE)));

    let client = h.ledger.read().await.client(mac(PHONE)).unwrap().unwrap();
    assert_eq!(client.status, AccessStatus::Active);
}

#[tokio::test]
async fn test_add_time_keeps_credit_when_unblock_fails() {
    let h = harness(None);
    h.network.fail(true);

    let response = h
        .server
        .post("/add_time")
        .json(&json!({"mac_address": PHONE, "amount": 2}))
        .await;

    response.assert_status_ok();
    let body: AddTimeResponse = response.json();
    assert!(!body.unblocked);

    let ledger = h.ledger.read().await;
    assert_eq!(ledger.check_balance(mac(PHONE)).unwrap().minutes(), 2);
    // Status is only recorded after a confirmed firewall change.
    assert_eq!(
        ledger.client(mac(PHONE)).unwrap().unwrap().status,
        AccessStatus::Inactive
    );
}

#[tokio::test]
async fn test_add_time_form_post_redirects_to_portal() {
    let h = harness(None);
    h.network.inner.block(mac(PHONE)).await.unwrap();

    let response = h
        .server
        .post("/add_time")
        .form(&[("mac_address", PHONE), ("amount", "4")])
        .await;

    response.assert_status(StatusCode::SEE_OTHER);
    assert_eq!(response.header(header::LOCATION), "/");
    assert!(!h.network.inner.is_blocked(mac(PHONE)));

    let ledger = h.ledger.read().await;
    assert_eq!(ledger.check_balance(mac(PHONE)).unwrap().minutes(), 4);
    assert_eq!(ledger.transactions(mac(PHONE)).unwrap().len(), 1);
}

#[tokio::test]
async fn test_add_time_form_rejects_non_numeric_amount() {
    let h = harness(None);

    let response = h
        .server
        .post("/add_time")
        .form(&[("mac_address", PHONE), ("amount", "five")])
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(h.ledger.read().await.clients().unwrap().is_empty());
}

#[tokio::test]
async fn test_add_time_rejects_zero_amount() {
    let h = harness(None);

    let response = h
        .server
        .post("/add_time")
        .json(&json!({"mac_address": PHONE, "amount": 0}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert!(h.ledger.read().await.clients().unwrap().is_empty());
}

#[tokio::test]
async fn test_add_time_rejects_negative_amount() {
    let h = harness(None);

    let response = h
        .server
        .post("/add_time")
        .json(&json!({"mac_address": PHONE, "amount": -5}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_add_time_rejects_bad_mac() {
    let h = harness(None);

    let response = h
        .server
        .post("/add_time")
        .json(&json!({"mac_address": "00:11:22:33:44", "amount": 1}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: ErrorResponse = response.json();
    assert!(body.error.contains("MAC"));
}

#[tokio::test]
async fn test_add_time_rejects_invalid_json() {
    let h = harness(None);

    let response = h
        .server
        .post("/add_time")
        .text("not valid json")
        .content_type("application/json")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

// =============================================================================
// MANUAL OVERRIDE
// =============================================================================

#[tokio::test]
async fn test_block_then_unblock() {
    let h = harness(None);

    let response = h
        .server
        .post("/block")
        .json(&json!({"mac_address": PHONE}))
        .await;
    response.assert_status_ok();
    let body: AccessResponse = response.json();
    assert_eq!(body.status, AccessStatus::Blocked);
    assert!(h.network.inner.is_blocked(mac(PHONE)));

    let response = h
        .server
        .post("/unblock")
        .json(&json!({"mac_address": PHONE}))
        .await;
    response.assert_status_ok();
    assert!(!h.network.inner.is_blocked(mac(PHONE)));
    assert_eq!(
        h.ledger.read().await.client(mac(PHONE)).unwrap().unwrap().status,
        AccessStatus::Active
    );
}

#[tokio::test]
async fn test_block_failure_leaves_status_unchanged() {
    let h = harness(None);
    h.network.fail(true);

    let response = h
        .server
        .post("/block")
        .json(&json!({"mac_address": PHONE}))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    assert!(h.ledger.read().await.client(mac(PHONE)).unwrap().is_none());
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

fn bearer(key: &str) -> HeaderValue {
    format!("Bearer {}", key).parse().unwrap()
}

#[tokio::test]
async fn test_auth_rejects_missing_key() {
    let h = harness(Some("coin-box-key"));

    let response = h.server.get("/clients").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_rejects_wrong_key() {
    let h = harness(Some("coin-box-key"));

    let response = h
        .server
        .post("/add_time")
        .add_header(header::AUTHORIZATION, bearer("guess"))
        .json(&json!({"mac_address": PHONE, "amount": 10}))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    assert!(h.ledger.read().await.clients().unwrap().is_empty());
}

#[tokio::test]
async fn test_auth_accepts_bearer_key() {
    let h = harness(Some("coin-box-key"));

    let response = h
        .server
        .get("/clients")
        .add_header(header::AUTHORIZATION, bearer("coin-box-key"))
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_leaves_health_and_balance_public() {
    let h = harness(Some("coin-box-key"));

    h.server.get("/health").await.assert_status_ok();
    h.server.get("/").await.assert_status_ok();
    h.server
        .get(&format!("/balance/{}", PHONE))
        .await
        .assert_status_ok();
}
