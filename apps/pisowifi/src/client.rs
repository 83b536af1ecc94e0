//! # Gateway HTTP Client
//!
//! Talks to a running `pisowifi server` over its portal API. The server
//! holds the ledger database exclusively, so console commands go through
//! here while it runs.

use crate::api::{
    API_KEY_ENV, AddTimeRequest, AddTimeResponse, BalanceResponse, ClientsResponse,
    ErrorResponse, StatusResponse, get_api_key_from_env,
};
use pisowifi_core::{ClientHistory, MacAddress, PisoError};
use serde::de::DeserializeOwned;

/// HTTP client for the gateway's portal API.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl GatewayClient {
    /// Client for the gateway at `base_url` (e.g. `http://10.0.0.1:5000`).
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Client using the key from `PISOWIFI_API_KEY`, if set.
    pub fn from_env(base_url: &str) -> Self {
        Self::new(base_url, get_api_key_from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request with optional Bearer auth.
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.request(method, &url);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    /// Send a request and decode the JSON body of a success response.
    async fn send<T: DeserializeOwned>(&self, req: reqwest::RequestBuilder) -> Result<T, PisoError> {
        let resp = req.send().await.map_err(|e| {
            PisoError::IoError(format!("Cannot connect to gateway at {}: {}", self.base_url, e))
        })?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<T>()
                .await
                .map_err(|e| PisoError::SerializationError(e.to_string()));
        }

        let message = match resp.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status.canonical_reason().unwrap_or("error").to_string(),
        };
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PisoError::GatewayError(
                status.as_u16(),
                format!("{} (set {} to the gateway's key)", message, API_KEY_ENV),
            ));
        }
        Err(PisoError::GatewayError(status.as_u16(), message))
    }

    /// GET /status
    pub async fn status(&self) -> Result<StatusResponse, PisoError> {
        self.send(self.request(reqwest::Method::GET, "/status")).await
    }

    /// GET /balance/{mac}
    pub async fn balance(&self, mac: MacAddress) -> Result<BalanceResponse, PisoError> {
        let path = format!("/balance/{}", mac);
        self.send(self.request(reqwest::Method::GET, &path)).await
    }

    /// POST /add_time; the gateway credits and unblocks in one step.
    pub async fn add_time(&self, mac: MacAddress, amount: u64) -> Result<AddTimeResponse, PisoError> {
        let body = AddTimeRequest {
            mac_address: mac.to_string(),
            amount,
        };
        let req = self.request(reqwest::Method::POST, "/add_time").json(&body);
        self.send(req).await
    }

    /// GET /clients
    pub async fn clients(&self) -> Result<ClientsResponse, PisoError> {
        self.send(self.request(reqwest::Method::GET, "/clients")).await
    }

    /// GET /history/{mac}
    pub async fn history(&self, mac: MacAddress) -> Result<ClientHistory, PisoError> {
        let path = format!("/history/{}", mac);
        self.send(self.request(reqwest::Method::GET, &path)).await
    }
}
