//! HTTP client for the browser session bridge.
//!
//! The bridge is a separate process that owns the actual browser instances
//! and exposes them as sessions over a small REST surface. This module
//! provides the client for that surface and the [`SessionBackend`] trait
//! the pool uses so tests can substitute a fake.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::OutpostConfig;
use crate::error::BridgeError;

/// A live browser session leased from the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserSession {
    /// Bridge-assigned session identifier.
    pub id: String,
    /// When the session was opened.
    pub created_at: DateTime<Utc>,
}

impl BrowserSession {
    /// Creates a session record stamped with the current time.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
        }
    }
}

/// Backend that provisions and tears down browser sessions.
///
/// The production implementation is [`BridgeClient`]; tests use in-memory
/// fakes so pool behavior can be exercised without a bridge process.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Opens a fresh browser session.
    async fn create_session(&self) -> Result<BrowserSession, BridgeError>;

    /// Closes a session. Closing an unknown session is not an error at the
    /// pool level; callers treat `SessionNotFound` as already-closed.
    async fn close_session(&self, id: &str) -> Result<(), BridgeError>;

    /// Checks whether a session is still responsive.
    async fn ping_session(&self, id: &str) -> Result<bool, BridgeError>;
}

/// Internal session structure from the bridge API.
#[derive(Debug, Deserialize)]
struct ApiSession {
    id: String,
}

/// Internal health structure from the bridge API.
#[derive(Debug, Deserialize)]
struct ApiHealth {
    healthy: bool,
}

/// REST client for the session bridge.
pub struct BridgeClient {
    /// Base URL for the bridge API.
    base_url: String,
    /// Optional bearer token for authentication.
    auth_token: Option<String>,
    /// HTTP client for making bridge requests.
    http: Client,
}

impl BridgeClient {
    /// Creates a new bridge client with explicit configuration.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL for the bridge (e.g., "http://127.0.0.1:4444")
    /// * `auth_token` - Optional bearer token
    /// * `request_timeout` - Per-request HTTP timeout
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Protocol` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        auth_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BridgeError::Protocol(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token,
            http,
        })
    }

    /// Creates a bridge client from application configuration.
    ///
    /// The per-request timeout sits above the longest explicit per-call
    /// budget, so a slow platform call is always settled by its caller's
    /// own deadline and never by the transport.
    pub fn from_config(config: &OutpostConfig) -> Result<Self, BridgeError> {
        Self::new(
            config.bridge_url.clone(),
            config.bridge_token.clone(),
            config.bridge_request_timeout(),
        )
    }

    /// Returns the base URL this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns whether an auth token is configured.
    pub fn has_auth_token(&self) -> bool {
        self.auth_token.is_some()
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method, url);
        if let Some(ref token) = self.auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder
    }

    async fn read_failure(response: reqwest::Response) -> BridgeError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error response".to_string());
        BridgeError::Api { status, body }
    }

    /// Sends a JSON body and decodes a JSON response.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::Api` for non-success statuses and
    /// `BridgeError::Protocol` if the body cannot be decoded.
    pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BridgeError> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BridgeError::Protocol(format!("failed to decode response: {e}")))
    }

    /// Fetches and decodes a JSON response.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BridgeError> {
        let response = self.request(reqwest::Method::GET, path).send().await?;

        if !response.status().is_success() {
            return Err(Self::read_failure(response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BridgeError::Protocol(format!("failed to decode response: {e}")))
    }
}

#[async_trait]
impl SessionBackend for BridgeClient {
    async fn create_session(&self) -> Result<BrowserSession, BridgeError> {
        let session: ApiSession = self
            .post_json("/sessions", &serde_json::json!({}))
            .await?;

        tracing::debug!(session_id = %session.id, "Opened browser session");
        Ok(BrowserSession::new(session.id))
    }

    async fn close_session(&self, id: &str) -> Result<(), BridgeError> {
        let response = self
            .request(reqwest::Method::DELETE, &format!("/sessions/{id}"))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                tracing::debug!(session_id = %id, "Closed browser session");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(BridgeError::SessionNotFound(id.to_string())),
            _ => Err(Self::read_failure(response).await),
        }
    }

    async fn ping_session(&self, id: &str) -> Result<bool, BridgeError> {
        let response = self
            .request(reqwest::Method::GET, &format!("/sessions/{id}/health"))
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => {
                let health: ApiHealth = response
                    .json()
                    .await
                    .map_err(|e| BridgeError::Protocol(format!("failed to decode health: {e}")))?;
                Ok(health.healthy)
            }
            // A session the bridge no longer knows about is simply unhealthy.
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(Self::read_failure(response).await),
        }
    }
}
