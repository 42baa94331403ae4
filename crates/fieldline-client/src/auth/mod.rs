//! OAuth2 client-credentials authentication
//!
//! [`TokenManager`] owns the token lifecycle: it performs the
//! client-credentials exchange against the remote's token endpoint, caches
//! the resulting bearer token, refreshes proactively before expiry, and
//! serializes concurrent refreshes into a single in-flight exchange.

mod manager;
mod token;

pub use manager::TokenManager;
pub use token::{AccessToken, TokenResponse};
