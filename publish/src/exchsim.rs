//! Authenticated HTTP forwarding to an exchange simulator
//!
//! The simulator issues bearer tokens from a login endpoint. The token is
//! cached until a request comes back 401, then refreshed once and the
//! request retried.

use crate::error::PublishError;
use crate::requests::{MarketMakeRequest, TradeInsertRequest};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const LOGIN_PATH: &str = "/api/auth/login";
const TRADE_INSERT_PATH: &str = "/api/trade/insert";
const MARKET_MAKE_PATH: &str = "/api/market-make/orders";

/// Endpoint and credentials for one simulator instance
#[derive(Clone, Debug)]
pub struct ExchSimConfig {
    /// Base url without a trailing slash
    pub base_url: String,
    /// Login username
    pub username: String,
    /// Login password
    pub password: String,
}

impl Default for ExchSimConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            username: "marketmaker1".to_string(),
            password: "mmpass123".to_string(),
        }
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// HTTP client with a shared cached bearer token. Clones share the token.
#[derive(Clone)]
pub struct ExchSimClient {
    http: reqwest::Client,
    config: ExchSimConfig,
    token: Arc<Mutex<Option<String>>>,
}

impl ExchSimClient {
    /// Build a client; no network traffic until the first publish
    #[must_use]
    pub fn new(config: ExchSimConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            token: Arc::new(Mutex::new(None)),
        }
    }

    /// Forward a trade to the simulator's insert endpoint
    pub async fn send_trade_insert(&self, request: &TradeInsertRequest) -> Result<(), PublishError> {
        self.post_authed(TRADE_INSERT_PATH, request).await
    }

    /// Forward a board to the simulator's market-make endpoint
    pub async fn send_market_make(&self, request: &MarketMakeRequest) -> Result<(), PublishError> {
        self.post_authed(MARKET_MAKE_PATH, request).await
    }

    async fn login(&self) -> Result<String, PublishError> {
        let url = format!("{}{}", self.config.base_url, LOGIN_PATH);
        let response = self
            .http
            .post(&url)
            .json(&LoginRequest {
                username: &self.config.username,
                password: &self.config.password,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(PublishError::Auth(format!(
                "login returned {}",
                response.status()
            )));
        }
        let body: LoginResponse = response.json().await?;
        info!(url = %self.config.base_url, "simulator login ok");
        Ok(body.token)
    }

    async fn current_token(&self) -> Result<String, PublishError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        *guard = Some(token.clone());
        Ok(token)
    }

    async fn clear_token(&self) {
        *self.token.lock().await = None;
    }

    async fn post_authed<T: Serialize>(&self, path: &str, body: &T) -> Result<(), PublishError> {
        let status = self.post_once(path, body).await?;
        if status == StatusCode::UNAUTHORIZED {
            // Token expired server-side; refresh and retry once.
            warn!(path, "token rejected, re-authenticating");
            self.clear_token().await;
            let status = self.post_once(path, body).await?;
            if !status.is_success() {
                return Err(PublishError::Status {
                    endpoint: path.to_string(),
                    status,
                });
            }
            return Ok(());
        }
        if !status.is_success() {
            return Err(PublishError::Status {
                endpoint: path.to_string(),
                status,
            });
        }
        Ok(())
    }

    async fn post_once<T: Serialize>(&self, path: &str, body: &T) -> Result<StatusCode, PublishError> {
        let token = self.current_token().await?;
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        debug!(path, status = %response.status(), "simulator call");
        Ok(response.status())
    }
}
