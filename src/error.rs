//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors surfaced by the protocol core.
///
/// Transient conditions (offline network, retryable HTTP failures) are
/// handled inside the transport retry loop and never appear here.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("request failed after {attempts} attempts: {method} {endpoint}")]
    MaxRetries {
        method: String,
        endpoint: String,
        attempts: u32,
    },

    #[error("session invalidated: API key rejected by server")]
    SessionInvalidated,

    #[error("storage quota exhausted: {0}")]
    MaxStorageReached(String),

    #[error("server error: {message}")]
    Server {
        message: String,
        code: Option<String>,
    },

    #[error("transport error during {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("response decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("crypto operation failed: {0}")]
    Crypto(String),

    #[error("missing configuration value: {0}")]
    Config(&'static str),

    #[error("not implemented: {0}")]
    Unimplemented(&'static str),
}

impl ProtocolError {
    /// Server error code, if the server supplied one.
    pub fn server_code(&self) -> Option<&str> {
        match self {
            ProtocolError::Server { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}
