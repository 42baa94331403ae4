//! Error types used throughout the client

use std::collections::BTreeMap;

use thiserror::Error;

/// Main error type for Fieldline API operations
#[derive(Debug, Error)]
pub enum Error {
    /// Token exchange failed, or the remote rejected the bearer token
    #[error("authentication failed (status {status:?})")]
    Authentication { status: Option<u16>, body: Option<String> },

    /// The remote returned structured field-level validation errors
    #[error("validation failed: {message}")]
    Validation { message: String, errors: BTreeMap<String, Vec<String>> },

    /// HTTP 429 from the remote; `retry_after` is the server hint in seconds
    #[error("rate limit exceeded (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// The circuit breaker rejected the call without contacting the remote
    #[error("circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// Generic non-2xx terminal response
    #[error("API request failed with status {status}")]
    Api { status: u16, body: Option<String>, request_id: Option<String> },

    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Transport-level failure (DNS, connect, TLS, broken connection)
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be deserialized into the expected type
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Invalid client configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid argument passed to a builder or helper
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A cache refresh failed; the prior snapshot is left intact
    #[error("cache refresh failed")]
    CacheRefresh(#[source] Box<Error>),
}

impl Error {
    /// HTTP status associated with the error, when one exists.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Authentication { status, .. } => *status,
            Error::Api { status, .. } => Some(*status),
            Error::RateLimited { .. } => Some(429),
            Error::CacheRefresh(source) => source.status(),
            _ => None,
        }
    }

    /// Correlation id reported by the remote, when present.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Error::Api { request_id, .. } => request_id.as_deref(),
            Error::CacheRefresh(source) => source.request_id(),
            _ => None,
        }
    }

    /// Whether the pipeline may retry after this error.
    ///
    /// Network failures, timeouts, 5xx responses and 429s are transient;
    /// everything else is terminal on first occurrence.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(_) | Error::Timeout | Error::RateLimited { .. } => true,
            Error::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub(crate) fn into_cache_refresh(self) -> Error {
        Error::CacheRefresh(Box::new(self))
    }
}

/// Result type alias for Fieldline operations
pub type Result<T> = std::result::Result<T, Error>;
