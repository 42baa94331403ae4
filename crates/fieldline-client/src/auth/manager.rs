//! Token manager with proactive refresh and single-flight exchange

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use super::token::{AccessToken, TokenResponse};
use crate::config::ApiConfig;
use crate::error::{Error, Result};

/// Manages the OAuth2 client-credentials token lifecycle
///
/// The check-expiry-and-maybe-refresh sequence runs inside one async mutex:
/// concurrent callers either observe the cached token (still valid) or wait
/// for the single in-flight exchange and receive its result. Exchange
/// requests go straight to the token endpoint with a plain HTTP client —
/// never through the request pipeline, which would recurse into this
/// manager.
pub struct TokenManager {
    http: reqwest::Client,
    config: Arc<ApiConfig>,
    current: Mutex<Option<AccessToken>>,
}

impl TokenManager {
    pub fn new(config: Arc<ApiConfig>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config, current: Mutex::new(None) })
    }

    /// Get a valid bearer token, refreshing if the cached one is inside the
    /// configured expiry buffer.
    ///
    /// If a proactive refresh fails while the previous token is still
    /// strictly valid, the previous token is served and the failure logged;
    /// the error propagates only when no usable token remains.
    pub async fn access_token(&self) -> Result<String> {
        let mut guard = self.current.lock().await;

        if let Some(token) = guard.as_ref() {
            if token.is_fresh(self.config.token_refresh_buffer) {
                return Ok(token.bearer().to_string());
            }
        }

        debug!("acquiring new access token");
        match self.exchange().await {
            Ok(fresh) => {
                let bearer = fresh.bearer().to_string();
                *guard = Some(fresh);
                Ok(bearer)
            }
            Err(err) => {
                if let Some(previous) = guard.as_ref() {
                    if !previous.is_expired() {
                        warn!(error = %err, "token refresh failed; serving still-valid token");
                        return Ok(previous.bearer().to_string());
                    }
                }
                Err(err)
            }
        }
    }

    /// Discard the cached token and perform a fresh exchange.
    ///
    /// For callers (diagnostics, credential rotation) that must not reuse a
    /// cached token. Shares the same critical section as `access_token`, so
    /// it cannot race a concurrent refresh.
    pub async fn force_refresh(&self) -> Result<DateTime<Utc>> {
        let mut guard = self.current.lock().await;
        let fresh = self.exchange().await?;
        let expires_at = fresh.expires_at();
        *guard = Some(fresh);
        Ok(expires_at)
    }

    /// Expiry of the currently cached token, if any.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.current.lock().await.as_ref().map(AccessToken::expires_at)
    }

    async fn exchange(&self) -> Result<AccessToken> {
        let url = self.config.token_url();
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        let response = self
            .http
            .post(url.as_str())
            .header(header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|err| {
                error!(error = %err, "token exchange request failed");
                if err.is_timeout() {
                    Error::Timeout
                } else {
                    Error::Network(err.to_string())
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| Error::Network(err.to_string()))?;

        if !status.is_success() {
            error!(status = status.as_u16(), "token exchange rejected");
            return Err(Error::Authentication {
                status: Some(status.as_u16()),
                body: Some(body),
            });
        }

        let parsed: TokenResponse = serde_json::from_str(&body).map_err(|_| {
            Error::Authentication { status: Some(status.as_u16()), body: Some(body.clone()) }
        })?;

        if parsed.access_token.trim().is_empty() {
            return Err(Error::Authentication {
                status: Some(status.as_u16()),
                body: Some(body),
            });
        }

        let token = AccessToken::from_response(parsed);
        debug!(expires_at = %token.expires_at(), "access token acquired");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn token_body(token: &str, expires_in: u64) -> serde_json::Value {
        serde_json::json!({
            "access_token": token,
            "token_type": "Bearer",
            "expires_in": expires_in,
        })
    }

    async fn manager_for(server: &MockServer) -> TokenManager {
        let config = ApiConfig::builder()
            .base_url(server.uri())
            .client_id("client-1")
            .client_secret("secret-1")
            .build()
            .expect("valid config");
        TokenManager::new(Arc::new(config)).expect("token manager")
    }

    #[tokio::test]
    async fn exchange_sends_client_credentials_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=client-1"))
            .and(body_string_contains("client_secret=secret-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-a", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        let token = manager.access_token().await.expect("token");
        assert_eq!(token, "tok-a");
    }

    #[tokio::test]
    async fn token_is_reused_within_validity_window() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-a", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        let first = manager.access_token().await.expect("first token");
        let second = manager.access_token().await.expect("second token");

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_callers_share_a_single_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(token_body("tok-shared", 3600))
                    .set_delay(Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let manager = Arc::new(manager_for(&server).await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { manager.access_token().await }));
        }

        for handle in handles {
            let token = handle.await.expect("task").expect("token");
            assert_eq!(token, "tok-shared");
        }
    }

    #[tokio::test]
    async fn expiring_token_triggers_exactly_one_new_exchange() {
        let server = MockServer::start().await;
        // First token expires inside the default 300s buffer, so the next
        // call must refresh.
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-short", 60)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-long", 3600)))
            .expect(1)
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        assert_eq!(manager.access_token().await.expect("first"), "tok-short");
        assert_eq!(manager.access_token().await.expect("second"), "tok-long");
        assert_eq!(manager.access_token().await.expect("third"), "tok-long");
    }

    #[tokio::test]
    async fn failed_refresh_serves_still_valid_token() {
        let server = MockServer::start().await;
        // Token valid for 100s: inside the 300s refresh buffer (so a refresh
        // is attempted) but not actually expired.
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-grace", 100)))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        assert_eq!(manager.access_token().await.expect("initial"), "tok-grace");
        // Refresh fails, but the previous token still has time left.
        assert_eq!(manager.access_token().await.expect("stale grace"), "tok-grace");
    }

    #[tokio::test]
    async fn exchange_failure_with_no_usable_token_is_an_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string(r#"{"error":"bad client"}"#))
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        let err = manager.access_token().await.expect_err("should fail");

        match err {
            Error::Authentication { status, body } => {
                assert_eq!(status, Some(401));
                assert!(body.unwrap_or_default().contains("bad client"));
            }
            other => panic!("expected authentication error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_token_body_is_an_authentication_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        let err = manager.access_token().await.expect_err("should fail");
        assert!(matches!(err, Error::Authentication { .. }));
    }

    #[tokio::test]
    async fn force_refresh_ignores_cached_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-a", 3600)))
            .expect(2)
            .mount(&server)
            .await;

        let manager = manager_for(&server).await;
        manager.access_token().await.expect("initial");
        let expires_at = manager.force_refresh().await.expect("forced refresh");

        assert!(expires_at > Utc::now());
    }
}
