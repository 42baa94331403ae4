//! Resilient access layer for the Fieldline facility-management API
//!
//! This crate provides the pieces every consumer of the remote API shares:
//!
//! - **[`auth`]**: OAuth2 client-credentials token lifecycle with
//!   single-flight refresh
//! - **[`http`]**: a request pipeline with bearer injection, retry with
//!   exponential backoff, and a circuit breaker
//! - **[`filter`]**: a fluent builder for the remote's query-string filter
//!   grammar
//! - **[`paging`]**: bounded aggregation of paginated collections
//! - **[`cache`]** and **[`resources`]**: single-flight snapshot caches over
//!   slow-changing reference data (clients, categories)
//!
//! Domain payloads (work orders, visits, vendors, documents) are passed
//! through as opaque JSON; this layer owns authentication, resilience, and
//! the wire conventions, not the domain model.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fieldline_client::{ApiClient, ApiConfig, ClientDirectory, FilterBuilder, PageRequest};
//!
//! # async fn example() -> fieldline_client::Result<()> {
//! let config = ApiConfig::builder()
//!     .base_url("https://acme.fieldline.example")
//!     .client_id("client-id")
//!     .client_secret("client-secret")
//!     .build()?;
//! let api = Arc::new(ApiClient::new(config)?);
//!
//! // Filtered, paginated access to an arbitrary resource.
//! let filters = FilterBuilder::new().where_in("workorders.status", ["New", "Assigned"]);
//! let page: serde_json::Value = api
//!     .get_with_filters("/api/ev1/workorders", &filters, PageRequest::first(50))
//!     .await?;
//!
//! // Cached reference data.
//! let clients = ClientDirectory::new(Arc::clone(&api));
//! clients.refresh().await?;
//! let acme = clients.get_by_name("Acme Facilities");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod filter;
pub mod http;
pub mod paging;
pub mod resources;
pub mod time;

// Re-export the types most callers need directly.
pub use auth::{AccessToken, TokenManager, TokenResponse};
pub use cache::{CacheStatus, ReferenceCache, SnapshotLoader};
pub use config::{ApiConfig, ApiConfigBuilder};
pub use error::{Error, Result};
pub use filter::{FilterBuilder, FilterOperator, FilterTerm, FilterValue, Scalar};
pub use http::{ApiClient, CircuitBreaker, CircuitBreakerConfig, CircuitState, Method};
pub use paging::{fetch_all, PageRequest, PageResult};
pub use resources::{Category, CategoryDirectory, ClientDirectory, ClientSummary};
