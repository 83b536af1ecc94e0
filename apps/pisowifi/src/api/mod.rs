//! # PisoWiFi HTTP API Module
//!
//! The captive portal and operator API, served with axum.
//!
//! ## Endpoints
//!
//! - `GET /` - Portal page with a top-up form per device (public)
//! - `GET /health` - Health check (always public)
//! - `GET /status` - Ledger totals and connected device count
//! - `GET /devices` - Connected devices with balances
//! - `GET /clients` - Every client in the ledger
//! - `GET /balance/{mac}` - Remaining time for one device (public)
//! - `GET /history/{mac}` - Top-ups and deductions for one device
//! - `POST /add_time` - Credit a coin top-up (JSON or portal form) and open
//!   the firewall
//! - `POST /block`, `POST /unblock` - Manual access override
//!
//! ## Security Configuration (Environment Variables)
//!
//! - `PISOWIFI_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `PISOWIFI_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)
//! - `PISOWIFI_API_KEY`: If set, requires Bearer token authentication

mod auth;
mod handlers;
mod middleware;
mod portal;
mod types;

pub use auth::{API_KEY_ENV, get_api_key_from_env};
pub use middleware::{RATE_LIMIT_ENV, create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    AccessRequest, AccessResponse, AddTimeRequest, AddTimeResponse, BalanceResponse,
    ClientsResponse, DeviceJson, DevicesResponse, ErrorResponse, HealthResponse, StatusResponse,
};

use crate::network::NetworkController;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use pisowifi_core::{Ledger, PisoError, Tariff};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub const CORS_ORIGINS_ENV: &str = "PISOWIFI_CORS_ORIGINS";

/// Request bodies are tiny JSON objects or form posts.
const BODY_LIMIT_BYTES: usize = 64 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    /// The ledger, shared with the metering loop.
    pub ledger: Arc<RwLock<Ledger>>,
    pub network: Arc<dyn NetworkController>,
    pub tariff: Tariff,
}

impl AppState {
    pub fn new(
        ledger: Arc<RwLock<Ledger>>,
        network: Arc<dyn NetworkController>,
        tariff: Tariff,
    ) -> Self {
        Self {
            ledger,
            network,
            tariff,
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from `PISOWIFI_CORS_ORIGINS`.
///
/// - `*`: any origin
/// - unset: localhost only
/// - otherwise: the comma-separated origins that parse
fn build_cors_layer() -> CorsLayer {
    match std::env::var(CORS_ORIGINS_ENV).ok().as_deref() {
        Some("*") => {
            tracing::warn!(
                "CORS: Allowing ALL origins (PISOWIFI_CORS_ORIGINS=*). This is insecure for production!"
            );
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!(
                    "CORS: No valid origins in PISOWIFI_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                restrictive_cors(allowed)
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:5000",
        "http://127.0.0.1:5000",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();
    restrictive_cors(origins)
}

fn restrictive_cors(origins: Vec<HeaderValue>) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Tracing
/// 2. CORS
/// 3. Body limit
/// 4. Rate limiting (if enabled)
/// 5. Authentication (if configured)
pub fn create_router(state: AppState) -> Router {
    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let has_auth = get_api_key_from_env().is_some();
    if has_auth {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!(
            "API key authentication DISABLED - operator endpoints are publicly accessible! \
             Set PISOWIFI_API_KEY to enable authentication."
        );
    }

    let mut router = Router::new()
        .route("/", get(handlers::index_handler))
        .route("/health", get(handlers::health_handler))
        .route("/status", get(handlers::status_handler))
        .route("/devices", get(handlers::devices_handler))
        .route("/clients", get(handlers::clients_handler))
        .route("/balance/{mac}", get(handlers::balance_handler))
        .route("/history/{mac}", get(handlers::history_handler))
        .route("/add_time", post(handlers::add_time_handler))
        .route("/block", post(handlers::block_handler))
        .route("/unblock", post(handlers::unblock_handler));

    if has_auth {
        router = router.layer(axum_middleware::from_fn(auth::api_key_auth_middleware));
    }

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors_layer())
                .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES)),
        )
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve the API on `addr` until `shutdown` resolves.
pub async fn run_server(
    addr: &str,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), PisoError> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| PisoError::IoError(format!("Bind failed: {}", e)))?;

    tracing::info!("PisoWiFi portal listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| PisoError::IoError(format!("Server error: {}", e)))
}
