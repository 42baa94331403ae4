//! Client configuration with builder pattern
//!
//! All knobs the access layer recognizes live here: remote endpoints,
//! credentials, timeouts, retry and circuit-breaker tuning. Construct via
//! [`ApiConfig::builder`] which validates before returning a config.

use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

const DEFAULT_TOKEN_ENDPOINT: &str = "/oauth/token";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_SECS: u64 = 1;
const DEFAULT_TOKEN_REFRESH_BUFFER_SECS: u64 = 300;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_COOLDOWN_SECS: u64 = 30;

/// Configuration for the Fieldline API client
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the remote API (e.g. `https://acme.fieldline.example`)
    pub base_url: String,
    /// OAuth2 client id for the client-credentials grant
    pub client_id: String,
    /// OAuth2 client secret for the client-credentials grant
    pub client_secret: String,
    /// Path of the token endpoint relative to `base_url`
    pub token_endpoint: String,
    /// Per-request timeout applied to every outbound call
    pub timeout: Duration,
    /// Number of retries after the initial attempt for transient failures
    pub max_retry_attempts: u32,
    /// Base delay for exponential backoff (`base * 2^n` between attempts)
    pub retry_base_delay: Duration,
    /// Refresh the token this long before its actual expiry
    pub token_refresh_buffer: Duration,
    /// Consecutive transient failures before the circuit opens
    pub circuit_breaker_failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call
    pub circuit_breaker_cooldown: Duration,
    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            retry_base_delay: Duration::from_secs(DEFAULT_RETRY_BASE_DELAY_SECS),
            token_refresh_buffer: Duration::from_secs(DEFAULT_TOKEN_REFRESH_BUFFER_SECS),
            circuit_breaker_failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            circuit_breaker_cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            user_agent: default_user_agent(),
        }
    }
}

fn default_user_agent() -> String {
    concat!("fieldline-client/", env!("CARGO_PKG_VERSION")).to_string()
}

impl ApiConfig {
    /// Create a new builder for `ApiConfig`
    pub fn builder() -> ApiConfigBuilder {
        ApiConfigBuilder::new()
    }

    /// Load configuration from `FIELDLINE_*` environment variables
    ///
    /// Recognized variables: `FIELDLINE_BASE_URL`, `FIELDLINE_CLIENT_ID`,
    /// `FIELDLINE_CLIENT_SECRET` (required) plus optional
    /// `FIELDLINE_TIMEOUT_SECS`, `FIELDLINE_MAX_RETRY_ATTEMPTS`,
    /// `FIELDLINE_TOKEN_REFRESH_BUFFER_SECS`.
    pub fn from_env() -> Result<Self> {
        let require = |name: &str| {
            std::env::var(name)
                .map_err(|_| Error::Config(format!("{name} environment variable is required")))
        };

        let mut builder = Self::builder()
            .base_url(require("FIELDLINE_BASE_URL")?)
            .client_id(require("FIELDLINE_CLIENT_ID")?)
            .client_secret(require("FIELDLINE_CLIENT_SECRET")?);

        if let Some(secs) = read_env_u64("FIELDLINE_TIMEOUT_SECS") {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        if let Some(attempts) = read_env_u64("FIELDLINE_MAX_RETRY_ATTEMPTS") {
            builder = builder.max_retry_attempts(attempts as u32);
        }
        if let Some(secs) = read_env_u64("FIELDLINE_TOKEN_REFRESH_BUFFER_SECS") {
            builder = builder.token_refresh_buffer(Duration::from_secs(secs));
        }

        builder.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("base_url is required".to_string()));
        }
        let parsed = Url::parse(&self.base_url)
            .map_err(|e| Error::Config(format!("base_url is not a valid URL: {e}")))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::Config("base_url must use http or https".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("client_id is required".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(Error::Config("client_secret is required".to_string()));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be greater than 0".to_string()));
        }
        if self.circuit_breaker_failure_threshold == 0 {
            return Err(Error::Config(
                "circuit_breaker_failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.circuit_breaker_cooldown.is_zero() {
            return Err(Error::Config(
                "circuit_breaker_cooldown must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute URL of the token endpoint.
    pub fn token_url(&self) -> String {
        self.endpoint(&self.token_endpoint)
    }

    /// Join a path (with optional query string) onto the base URL.
    pub fn endpoint(&self, path_and_query: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path_and_query.starts_with('/') {
            format!("{base}{path_and_query}")
        } else {
            format!("{base}/{path_and_query}")
        }
    }
}

fn read_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|raw| raw.parse().ok())
}

/// Builder for [`ApiConfig`]
#[derive(Debug, Default)]
pub struct ApiConfigBuilder {
    config: ApiConfig,
}

impl ApiConfigBuilder {
    pub fn new() -> Self {
        Self { config: ApiConfig::default() }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.config.client_id = id.into();
        self
    }

    pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.client_secret = secret.into();
        self
    }

    pub fn token_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        self.config.token_endpoint =
            if endpoint.starts_with('/') { endpoint } else { format!("/{endpoint}") };
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_retry_attempts(mut self, attempts: u32) -> Self {
        self.config.max_retry_attempts = attempts;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry_base_delay = delay;
        self
    }

    pub fn token_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.config.token_refresh_buffer = buffer;
        self
    }

    pub fn circuit_breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.config.circuit_breaker_failure_threshold = threshold;
        self
    }

    pub fn circuit_breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.config.circuit_breaker_cooldown = cooldown;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.config.user_agent = agent.into();
        self
    }

    /// Build the final configuration, validating required fields.
    pub fn build(self) -> Result<ApiConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
