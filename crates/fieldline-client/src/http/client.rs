//! The API client: bearer injection, retry with backoff, circuit breaking,
//! and translation of terminal responses into the typed error taxonomy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::{header, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::auth::TokenManager;
use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::filter::FilterBuilder;
use crate::paging::PageRequest;

/// Resilient client for the Fieldline API
///
/// Cheap to share behind an `Arc`; all mutable state (cached token, breaker
/// counters) is internally synchronized, so callers need no locking of their
/// own.
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<ApiConfig>,
    tokens: Arc<TokenManager>,
    breaker: CircuitBreaker,
}

/// How a single attempt resolved, before retry policy is applied.
enum Outcome {
    /// 2xx with a usable body
    Success(String),
    /// Conclusive answer from the remote; never retried
    Terminal(Error),
    /// Worth retrying: network error, timeout, 5xx, 429
    Transient(Error),
}

impl ApiClient {
    /// Create a client from an owned configuration.
    pub fn new(config: ApiConfig) -> Result<Self> {
        Self::with_config(Arc::new(config))
    }

    /// Create a client from a shared configuration.
    pub fn with_config(config: Arc<ApiConfig>) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let tokens = Arc::new(TokenManager::new(Arc::clone(&config))?);
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(
            config.circuit_breaker_failure_threshold,
            config.circuit_breaker_cooldown,
        ))?;

        Ok(Self { http, config, tokens, breaker })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Current state of the pipeline's circuit breaker.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Get a valid bearer token (mainly for diagnostics; requests made
    /// through this client are annotated automatically).
    pub async fn access_token(&self) -> Result<String> {
        self.tokens.access_token().await
    }

    /// Discard the cached token and perform a fresh exchange.
    pub async fn force_token_refresh(&self) -> Result<DateTime<Utc>> {
        self.tokens.force_refresh().await
    }

    /// Send an arbitrary request through the pipeline.
    ///
    /// The convenience methods below cover the common verbs; this is the
    /// escape hatch for anything else.
    pub async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Value>,
    ) -> Result<T> {
        self.dispatch(method, path_and_query, body).await
    }

    /// `GET` a path and deserialize the response.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.dispatch(Method::GET, path, None).await
    }

    /// `GET` a listing with pagination and an optional filter expression.
    ///
    /// The serialized filter is percent-encoded exactly once here; an empty
    /// builder omits the `filters` parameter entirely.
    pub async fn get_with_filters<T: DeserializeOwned>(
        &self,
        path: &str,
        filters: &FilterBuilder,
        page: PageRequest,
    ) -> Result<T> {
        let mut path_and_query = format!("{path}?start={}&limit={}", page.start, page.limit);
        if !filters.is_empty() {
            path_and_query.push_str("&filters=");
            path_and_query.push_str(&filters.encoded());
        }
        self.dispatch(Method::GET, &path_and_query, None).await
    }

    /// `POST` a JSON payload and deserialize the response.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.dispatch(Method::POST, path, Some(to_body(body)?)).await
    }

    /// `PUT` a JSON payload and deserialize the response.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.dispatch(Method::PUT, path, Some(to_body(body)?)).await
    }

    /// `PATCH` a JSON payload and deserialize the response.
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.dispatch(Method::PATCH, path, Some(to_body(body)?)).await
    }

    /// `DELETE` a path and deserialize the response.
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.dispatch(Method::DELETE, path, None).await
    }

    /// Send a request through the full pipeline: bearer injection, circuit
    /// breaker, retry with exponential backoff, error translation.
    async fn dispatch<T: DeserializeOwned>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let url = self.config.endpoint(path_and_query);
        let max_attempts = self.config.max_retry_attempts as u64 + 1;
        let mut attempt: u64 = 1;

        loop {
            // Token first: the exchange has its own client and must not
            // consume the breaker's half-open trial slot.
            let token = self.tokens.access_token().await?;

            if !self.breaker.can_execute() {
                debug!(%method, url = %url, "circuit open, rejecting call");
                return Err(Error::CircuitOpen);
            }

            debug!(attempt, %method, url = %url, "sending request");

            let mut request = self
                .http
                .request(method.clone(), url.as_str())
                .bearer_auth(&token)
                .header(header::ACCEPT, "application/json");
            if let Some(ref payload) = body {
                request = request.json(payload);
            }

            let outcome = match request.send().await {
                Ok(response) => self.classify(response).await,
                Err(err) => {
                    let mapped = if err.is_timeout() {
                        Error::Timeout
                    } else {
                        Error::Network(err.to_string())
                    };
                    Outcome::Transient(mapped)
                }
            };

            match outcome {
                Outcome::Success(text) => {
                    self.breaker.record_success();
                    return parse_body(&text);
                }
                Outcome::Terminal(err) => {
                    // A conclusive response means the remote is reachable;
                    // only transient failures feed the breaker.
                    self.breaker.record_success();
                    return Err(err);
                }
                Outcome::Transient(err) => {
                    self.breaker.record_failure();
                    if attempt >= max_attempts {
                        warn!(attempt, error = %err, "retry attempts exhausted");
                        return Err(err);
                    }
                    let delay = self.backoff_delay(attempt);
                    warn!(attempt, ?delay, error = %err, "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Exponential backoff: `base * 2^(n-1)` for the n-th retry.
    fn backoff_delay(&self, retry_number: u64) -> Duration {
        let shift = retry_number.saturating_sub(1).min(16) as u32;
        self.config.retry_base_delay.saturating_mul(1u32 << shift)
    }

    async fn classify(&self, response: reqwest::Response) -> Outcome {
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let body = match response.text().await {
            Ok(text) => text,
            Err(err) => return Outcome::Transient(Error::Network(err.to_string())),
        };

        debug!(status = status.as_u16(), "received response");

        if status.is_success() {
            // The remote occasionally reports failures with HTTP 200 and an
            // `error` key in the body; treat those as terminal API errors.
            if let Some(err) = embedded_error(status.as_u16(), &body, request_id) {
                return Outcome::Terminal(err);
            }
            return Outcome::Success(body);
        }

        if status.as_u16() == 429 {
            return Outcome::Transient(Error::RateLimited { retry_after });
        }

        if status.is_server_error() {
            return Outcome::Transient(Error::Api {
                status: status.as_u16(),
                body: Some(body),
                request_id,
            });
        }

        Outcome::Terminal(terminal_error(status.as_u16(), body, request_id))
    }
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body).map_err(|e| Error::Decode(format!("failed to encode body: {e}")))
}

fn parse_body<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    let source = if trimmed.is_empty() { "null" } else { trimmed };
    serde_json::from_str(source).map_err(|e| Error::Decode(e.to_string()))
}

/// Detect the remote's anomalous 200-with-error responses.
fn embedded_error(status: u16, body: &str, request_id: Option<String>) -> Option<Error> {
    let value: Value = serde_json::from_str(body).ok()?;
    let object = value.as_object()?;
    if !object.contains_key("error") {
        return None;
    }
    Some(Error::Api { status, body: Some(body.to_string()), request_id })
}

fn terminal_error(status: u16, body: String, request_id: Option<String>) -> Error {
    match status {
        401 | 403 => Error::Authentication { status: Some(status), body: Some(body) },
        400 | 422 => Error::Validation {
            message: format!("remote rejected the request with status {status}"),
            errors: parse_validation_errors(&body),
        },
        _ => Error::Api { status, body: Some(body), request_id },
    }
}

fn parse_validation_errors(body: &str) -> BTreeMap<String, Vec<String>> {
    let mut parsed = BTreeMap::new();
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return parsed;
    };
    let Some(map) = value.get("errors").and_then(Value::as_object) else {
        return parsed;
    };
    for (field, messages) in map {
        let collected = match messages {
            Value::Array(items) => {
                items.iter().filter_map(|m| m.as_str().map(str::to_string)).collect()
            }
            Value::String(message) => vec![message.clone()],
            _ => Vec::new(),
        };
        parsed.insert(field.clone(), collected);
    }
    parsed
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Widget {
        id: i64,
        name: String,
    }

    #[derive(Debug, Deserialize)]
    struct WidgetsEnvelope {
        widgets: Vec<Widget>,
    }

    async fn mount_token_endpoint(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "test-token",
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .mount(server)
            .await;
    }

    fn config_for(server: &MockServer) -> crate::config::ApiConfigBuilder {
        ApiConfig::builder()
            .base_url(server.uri())
            .client_id("client")
            .client_secret("secret")
            .retry_base_delay(Duration::from_millis(1))
    }

    async fn client_for(server: &MockServer) -> ApiClient {
        mount_token_endpoint(server).await;
        ApiClient::new(config_for(server).build().expect("valid config")).expect("client")
    }

    #[tokio::test]
    async fn attaches_bearer_and_accept_headers() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .and(header("Authorization", "Bearer test-token"))
            .and(header("Accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "widgets": [{"id": 1, "name": "pump"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let envelope: WidgetsEnvelope = client.get("/api/ev1/widgets").await.expect("response");
        assert_eq!(envelope.widgets, vec![Widget { id: 1, name: "pump".into() }]);
    }

    #[tokio::test]
    async fn retries_server_errors_until_success() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"widgets": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let envelope: WidgetsEnvelope = client.get("/api/ev1/widgets").await.expect("response");
        assert!(envelope.widgets.is_empty());
    }

    #[tokio::test]
    async fn always_failing_endpoint_is_attempted_exactly_retries_plus_one_times() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        let client = ApiClient::new(
            config_for(&server)
                .max_retry_attempts(3)
                // Keep the breaker out of the way of this retry-count test.
                .circuit_breaker_failure_threshold(100)
                .build()
                .expect("valid config"),
        )
        .expect("client");

        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(4)
            .mount(&server)
            .await;

        let err = client.get::<Value>("/api/ev1/widgets").await.expect_err("should fail");
        match err {
            Error::Api { status: 503, .. } => {}
            other => panic!("expected 503 ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets/99"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_string(r#"{"error":"not found"}"#)
                    .insert_header("x-request-id", "req-404"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let err = client.get::<Value>("/api/ev1/widgets/99").await.expect_err("should fail");
        match err {
            Error::Api { status: 404, request_id, .. } => {
                assert_eq!(request_id.as_deref(), Some("req-404"));
            }
            other => panic!("expected 404 ApiError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unauthorized_maps_to_authentication_error() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .respond_with(ResponseTemplate::new(401).set_body_string("token rejected"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client.get::<Value>("/api/ev1/widgets").await.expect_err("should fail");
        assert!(matches!(err, Error::Authentication { status: Some(401), .. }));
    }

    #[tokio::test]
    async fn unprocessable_entity_carries_field_errors() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        Mock::given(method("POST"))
            .and(path("/api/ev1/workorders"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({
                "errors": {
                    "description": ["can't be blank"],
                    "priority": ["unknown value"],
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client
            .post::<Value, _>("/api/ev1/workorders", &serde_json::json!({"priority": "??"}))
            .await
            .expect_err("should fail");

        match err {
            Error::Validation { errors, .. } => {
                assert_eq!(errors["description"], vec!["can't be blank"]);
                assert_eq!(errors["priority"], vec!["unknown value"]);
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rate_limit_is_retried_then_surfaced_with_hint() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        let client = ApiClient::new(
            config_for(&server)
                .max_retry_attempts(1)
                .circuit_breaker_failure_threshold(100)
                .build()
                .expect("valid config"),
        )
        .expect("client");

        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("slow down"),
            )
            .expect(2)
            .mount(&server)
            .await;

        let err = client.get::<Value>("/api/ev1/widgets").await.expect_err("should fail");
        match err {
            Error::RateLimited { retry_after } => assert_eq!(retry_after, Some(7)),
            other => panic!("expected rate limit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn embedded_error_on_200_is_terminal() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": "Invalid filter syntax",
                "error_code": "FILTER_PARSE",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client.get::<Value>("/api/ev1/widgets").await.expect_err("should fail");
        match err {
            Error::Api { status: 200, body, .. } => {
                assert!(body.unwrap_or_default().contains("Invalid filter syntax"));
            }
            other => panic!("expected embedded API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn circuit_opens_after_threshold_and_fails_fast() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        let client = ApiClient::new(
            config_for(&server)
                .max_retry_attempts(0)
                .circuit_breaker_failure_threshold(2)
                .circuit_breaker_cooldown(Duration::from_secs(60))
                .build()
                .expect("valid config"),
        )
        .expect("client");

        // Exactly two requests reach the wire; the third is short-circuited.
        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        for _ in 0..2 {
            let err = client.get::<Value>("/api/ev1/widgets").await.expect_err("should fail");
            assert!(matches!(err, Error::Api { status: 500, .. }));
        }
        assert_eq!(client.circuit_state(), CircuitState::Open);

        let err = client.get::<Value>("/api/ev1/widgets").await.expect_err("should fail fast");
        assert!(matches!(err, Error::CircuitOpen));
    }

    #[tokio::test]
    async fn circuit_recovers_through_a_successful_trial_call() {
        let server = MockServer::start().await;
        mount_token_endpoint(&server).await;
        let client = ApiClient::new(
            config_for(&server)
                .max_retry_attempts(0)
                .circuit_breaker_failure_threshold(1)
                .circuit_breaker_cooldown(Duration::from_millis(50))
                .build()
                .expect("valid config"),
        )
        .expect("client");

        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/ev1/widgets"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"widgets": []})),
            )
            .mount(&server)
            .await;

        let err = client.get::<Value>("/api/ev1/widgets").await.expect_err("first call fails");
        assert!(matches!(err, Error::Api { status: 502, .. }));
        assert_eq!(client.circuit_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;

        let envelope: WidgetsEnvelope =
            client.get("/api/ev1/widgets").await.expect("trial call succeeds");
        assert!(envelope.widgets.is_empty());
        assert_eq!(client.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn filters_are_encoded_once_in_the_query_string() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/ev1/visits"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"visits": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let filters = FilterBuilder::new().where_in("visits.status", ["Completed", "Scheduled"]);
        let _: Value = client
            .get_with_filters("/api/ev1/visits", &filters, PageRequest::new(0, 20))
            .await
            .expect("response");

        let requests = server.received_requests().await.expect("requests recorded");
        let visit_request = requests
            .iter()
            .find(|r| r.url.path() == "/api/ev1/visits")
            .expect("visits request sent");

        let query: std::collections::HashMap<_, _> =
            visit_request.url.query_pairs().into_owned().collect();
        assert_eq!(query["start"], "0");
        assert_eq!(query["limit"], "20");
        // query_pairs decodes once; round-tripping back to the raw JSON
        // proves the value was not double-encoded.
        assert_eq!(query["filters"], filters.to_json());
    }

    #[tokio::test]
    async fn empty_filter_omits_the_query_parameter() {
        let server = MockServer::start().await;
        let client = client_for(&server).await;

        Mock::given(method("GET"))
            .and(path("/api/ev1/visits"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"visits": []})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let _: Value = client
            .get_with_filters("/api/ev1/visits", &FilterBuilder::new(), PageRequest::new(0, 20))
            .await
            .expect("response");

        let requests = server.received_requests().await.expect("requests recorded");
        let visit_request = requests
            .iter()
            .find(|r| r.url.path() == "/api/ev1/visits")
            .expect("visits request sent");
        assert!(!visit_request.url.query().unwrap_or_default().contains("filters="));
    }
}
