//! HTTP transport for the storage API.
//!
//! Issues checksummed, authenticated JSON requests against a randomly
//! chosen gateway, with bounded retry, offline awareness and
//! session-invalidation detection. Upload and download traffic runs on
//! separate connection pools with their own timeouts and concurrency
//! bounds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rand::seq::IndexedRandom;
use reqwest::{Client, Method, StatusCode};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::config::ProtocolConfig;
use crate::crypto::buffer_to_hash;
use crate::error::{ProtocolError, ProtocolResult};
use crate::store::ConfigStore;
use crate::types::ApiResponse;

/// Invoked once when the server rejects the session's API key.
pub type LogoutHook = Arc<dyn Fn() + Send + Sync>;

/// Shared network reachability flag, set by the embedding application's
/// connectivity watcher.
#[derive(Clone, Default)]
pub struct OnlineFlag {
    offline: Arc<AtomicBool>,
}

impl OnlineFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }
}

/// Pooled, checksummed HTTP transport.
pub struct Transport {
    config: Arc<ProtocolConfig>,
    store: Arc<dyn ConfigStore>,
    api_client: Client,
    upload_client: Client,
    download_client: Client,
    api_permits: Arc<Semaphore>,
    upload_permits: Arc<Semaphore>,
    download_permits: Arc<Semaphore>,
    online: OnlineFlag,
    logout: LogoutHook,
    logout_fired: AtomicBool,
}

impl Transport {
    pub fn new(
        config: Arc<ProtocolConfig>,
        store: Arc<dyn ConfigStore>,
        online: OnlineFlag,
        logout: LogoutHook,
    ) -> ProtocolResult<Self> {
        let api_client = Client::builder()
            .user_agent(config.user_agent())
            .timeout(config.api_timeout)
            .build()?;
        let upload_client = Client::builder()
            .user_agent(config.user_agent())
            .timeout(config.upload_timeout)
            .build()?;
        let download_client = Client::builder()
            .user_agent(config.user_agent())
            .timeout(config.download_timeout)
            .build()?;

        Ok(Self {
            api_permits: Arc::new(Semaphore::new(config.api_pool_size)),
            upload_permits: Arc::new(Semaphore::new(config.upload_pool_size)),
            download_permits: Arc::new(Semaphore::new(config.download_pool_size)),
            config,
            store,
            api_client,
            upload_client,
            download_client,
            online,
            logout,
            logout_fired: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    pub fn online(&self) -> &OnlineFlag {
        &self.online
    }

    /// POST to an API endpoint with the bearer token from the store.
    pub async fn request(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> ProtocolResult<ApiResponse> {
        self.request_with(Method::POST, endpoint, body, None).await
    }

    /// Request with explicit method and optional API key override.
    pub async fn request_with(
        &self,
        method: Method,
        endpoint: &str,
        body: serde_json::Value,
        api_key: Option<&str>,
    ) -> ProtocolResult<ApiResponse> {
        self.request_raw(method, endpoint, body, api_key)
            .await
            .map(|(parsed, _raw)| parsed)
    }

    /// Request that also returns the raw response body bytes.
    pub async fn request_raw(
        &self,
        method: Method,
        endpoint: &str,
        body: serde_json::Value,
        api_key: Option<&str>,
    ) -> ProtocolResult<(ApiResponse, Bytes)> {
        // Serialize exactly once; the checksum must cover the bytes that
        // go on the wire.
        let body_bytes = serde_json::to_vec(&body)?;
        let checksum = buffer_to_hash(&body_bytes);

        let mut attempts: u32 = 0;
        loop {
            if !self.online.is_online() {
                debug!(endpoint, "network offline, delaying request");
                tokio::time::sleep(self.config.retry_api_request_timeout).await;
                continue;
            }

            if attempts >= self.config.max_retry_api_request {
                return Err(ProtocolError::MaxRetries {
                    method: method.to_string(),
                    endpoint: endpoint.to_string(),
                    attempts,
                });
            }
            attempts += 1;

            let key = match api_key {
                Some(key) => key.to_string(),
                None => self.store.api_key().unwrap_or_default(),
            };
            let gateway = pick_gateway(&self.config.api_gateways)?;
            let url = format!("{gateway}{endpoint}");

            let _permit = self
                .api_permits
                .clone()
                .acquire_owned()
                .await
                .expect("api pool semaphore is never closed");

            let sent = self
                .api_client
                .request(method.clone(), &url)
                .header("Content-Type", "application/json")
                .header("Authorization", format!("Bearer {key}"))
                .header("Checksum", &checksum)
                .body(body_bytes.clone())
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(err) => {
                    warn!(endpoint, attempt = attempts, error = %err, "request failed, retrying");
                    tokio::time::sleep(self.config.retry_api_request_timeout).await;
                    continue;
                }
            };

            if response.status() != StatusCode::OK {
                warn!(
                    endpoint,
                    attempt = attempts,
                    status = %response.status(),
                    "unexpected status, retrying"
                );
                tokio::time::sleep(self.config.retry_api_request_timeout).await;
                continue;
            }

            let raw = match response.bytes().await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(endpoint, attempt = attempts, error = %err, "body read failed, retrying");
                    tokio::time::sleep(self.config.retry_api_request_timeout).await;
                    continue;
                }
            };

            let parsed: ApiResponse = serde_json::from_slice(&raw)?;

            if parsed.code.as_deref() == Some("internal_error") {
                warn!(endpoint, attempt = attempts, "server internal error, retrying");
                tokio::time::sleep(self.config.retry_api_request_timeout).await;
                continue;
            }

            if session_invalidated(&parsed) {
                self.fire_logout();
                return Err(ProtocolError::SessionInvalidated);
            }

            return Ok((parsed, raw));
        }
    }

    /// Runs the logout hook at most once per transport.
    fn fire_logout(&self) {
        if !self.logout_fired.swap(true, Ordering::SeqCst) {
            (self.logout)();
        }
    }

    // ── Transfer-pool access (used by the transfer engine) ──

    /// POST builder on the upload pool against a random ingest gateway.
    pub fn upload_post(&self, path_and_query: &str) -> ProtocolResult<reqwest::RequestBuilder> {
        let gateway = pick_gateway(&self.config.upload_gateways)?;
        Ok(self
            .upload_client
            .post(format!("{gateway}{path_and_query}")))
    }

    /// GET builder on the download pool against a random egress gateway.
    pub fn download_get(&self, path: &str) -> ProtocolResult<reqwest::RequestBuilder> {
        let gateway = pick_gateway(&self.config.download_gateways)?;
        Ok(self.download_client.get(format!("{gateway}{path}")))
    }

    pub async fn acquire_upload_permit(&self) -> OwnedSemaphorePermit {
        self.upload_permits
            .clone()
            .acquire_owned()
            .await
            .expect("upload pool semaphore is never closed")
    }

    pub async fn acquire_download_permit(&self) -> OwnedSemaphorePermit {
        self.download_permits
            .clone()
            .acquire_owned()
            .await
            .expect("download pool semaphore is never closed")
    }
}

/// Uniform random choice among equivalent gateways.
fn pick_gateway(gateways: &[String]) -> ProtocolResult<&str> {
    gateways
        .choose(&mut rand::rng())
        .map(String::as_str)
        .ok_or(ProtocolError::Config("empty gateway list"))
}

/// True when the response signals a rejected API key.
fn session_invalidated(response: &ApiResponse) -> bool {
    if response.code.as_deref() == Some("api_key_not_found") {
        return true;
    }
    match &response.message {
        Some(message) => {
            let lower = message.to_lowercase();
            lower.contains("api key not found") || lower.contains("invalid api key")
        }
        None => false,
    }
}
