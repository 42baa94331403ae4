//! Access token value object and token-endpoint wire types

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Wire response from the remote token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// An issued bearer token with its computed expiry
///
/// Created on a successful exchange, replaced wholesale on refresh, never
/// mutated in place. Only the [`TokenManager`](super::TokenManager) holds
/// one; callers see just the bearer string.
#[derive(Debug, Clone)]
pub struct AccessToken {
    token: String,
    token_type: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    /// Build from a token-endpoint response, stamping `issued_at = now` and
    /// computing `expires_at`. Lifetimes are clamped to at least one second
    /// so `expires_at > issued_at` always holds.
    pub fn from_response(response: TokenResponse) -> Self {
        let issued_at = Utc::now();
        let lifetime = chrono::Duration::seconds(response.expires_in.max(1));
        Self {
            token: response.access_token,
            token_type: response.token_type,
            issued_at,
            expires_at: issued_at + lifetime,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_lifetime(token: &str, lifetime: chrono::Duration) -> Self {
        let issued_at = Utc::now();
        Self {
            token: token.to_string(),
            token_type: "Bearer".to_string(),
            issued_at,
            expires_at: issued_at + lifetime,
        }
    }

    /// The raw bearer string sent in `Authorization` headers.
    pub fn bearer(&self) -> &str {
        &self.token
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the token is still comfortably inside its validity window:
    /// more than `buffer` remains before expiry.
    pub fn is_fresh(&self, buffer: Duration) -> bool {
        match (self.expires_at - Utc::now()).to_std() {
            Ok(remaining) => remaining > buffer,
            // Negative remaining time: already expired.
            Err(_) => false,
        }
    }

    /// Whether the token is past its actual expiry.
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
