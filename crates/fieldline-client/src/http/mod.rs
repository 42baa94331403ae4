//! Resilient HTTP request pipeline
//!
//! Every outbound call is annotated with a bearer token from the
//! [`TokenManager`](crate::auth::TokenManager), retried with exponential
//! backoff on transient failures, and guarded by a circuit breaker that
//! stops hammering a failing remote.

mod circuit_breaker;
mod client;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use client::ApiClient;
pub use reqwest::Method;
