//! Protocol configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the protocol core.
///
/// Gateway lists hold equivalent hosts; one is chosen uniformly at random
/// per request attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// API gateways (e.g. "https://api.lockdrive.io").
    pub api_gateways: Vec<String>,

    /// Upload ingest gateways.
    pub upload_gateways: Vec<String>,

    /// Download egress gateways.
    pub download_gateways: Vec<String>,

    /// Product name for the User-Agent header.
    pub product: String,

    /// Product version for the User-Agent header.
    pub version: String,

    /// Build identifier for the User-Agent header.
    pub build: String,

    /// Platform tag for the User-Agent header.
    pub platform: String,

    /// Maximum HTTP attempts per API request.
    pub max_retry_api_request: u32,

    /// Sleep between API attempts, and between offline re-checks.
    pub retry_api_request_timeout: Duration,

    /// Maximum attempts per chunk upload.
    pub max_retry_upload: u32,

    /// Sleep between upload attempts.
    pub retry_upload_timeout: Duration,

    /// Maximum attempts per chunk download.
    pub max_retry_download: u32,

    /// Sleep between download attempts.
    pub retry_download_timeout: Duration,

    /// In-flight request bound for the API pool.
    pub api_pool_size: usize,

    /// In-flight request bound for the upload pool.
    pub upload_pool_size: usize,

    /// In-flight request bound for the download pool.
    pub download_pool_size: usize,

    /// Whole-request timeout for API calls.
    pub api_timeout: Duration,

    /// Whole-request timeout for chunk uploads.
    pub upload_timeout: Duration,

    /// Whole-request timeout for chunk downloads.
    pub download_timeout: Duration,

    /// Pause gate polling cadence.
    pub pause_poll_interval: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            api_gateways: vec![
                "https://api.lockdrive.io".to_string(),
                "https://api2.lockdrive.io".to_string(),
                "https://api3.lockdrive.io".to_string(),
            ],
            upload_gateways: vec![
                "https://ingest.lockdrive.io".to_string(),
                "https://ingest2.lockdrive.io".to_string(),
            ],
            download_gateways: vec![
                "https://down.lockdrive.io".to_string(),
                "https://down2.lockdrive.io".to_string(),
            ],
            product: "Lockdrive".to_string(),
            version: "0.4.2".to_string(),
            build: "desktop".to_string(),
            platform: std::env::consts::OS.to_string(),
            max_retry_api_request: 128,
            retry_api_request_timeout: Duration::from_secs(1),
            max_retry_upload: 32,
            retry_upload_timeout: Duration::from_secs(1),
            max_retry_download: 64,
            retry_download_timeout: Duration::from_secs(1),
            api_pool_size: 128,
            upload_pool_size: 32,
            download_pool_size: 64,
            api_timeout: Duration::from_secs(500),
            upload_timeout: Duration::from_secs(3600),
            download_timeout: Duration::from_secs(86_400),
            pause_poll_interval: Duration::from_secs(1),
        }
    }
}

impl ProtocolConfig {
    /// User-Agent value: `<product>/<version>-<build>-<platform>`.
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{}-{}-{}",
            self.product, self.version, self.build, self.platform
        )
    }

    /// Config pointing every gateway list at a single test server,
    /// with retry timeouts short enough for integration tests.
    pub fn test(base_url: &str) -> Self {
        Self {
            api_gateways: vec![base_url.to_string()],
            upload_gateways: vec![base_url.to_string()],
            download_gateways: vec![base_url.to_string()],
            max_retry_api_request: 3,
            retry_api_request_timeout: Duration::from_millis(40),
            max_retry_upload: 3,
            retry_upload_timeout: Duration::from_millis(40),
            max_retry_download: 3,
            retry_download_timeout: Duration::from_millis(40),
            api_timeout: Duration::from_secs(10),
            upload_timeout: Duration::from_secs(10),
            download_timeout: Duration::from_secs(10),
            pause_poll_interval: Duration::from_millis(25),
            ..Self::default()
        }
    }
}
