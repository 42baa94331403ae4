//! Wire models for reference-data listings
//!
//! List responses are objects keyed by the resource name, optionally
//! carrying pagination metadata. Raw payloads are trimmed to the fields the
//! directories need; everything else is ignored on deserialization.

use serde::{Deserialize, Serialize};

use crate::paging::PageResult;

/// Pagination metadata as reported by listing endpoints
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub total: Option<u64>,
    pub per_page: Option<u64>,
    pub current_page: Option<u64>,
    pub total_pages: Option<u64>,
}

/// Address block nested in a raw client payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientAddress {
    pub company: Option<String>,
    pub dba: Option<String>,
}

/// Raw client payload from `GET /api/ev1/clients`
#[derive(Debug, Clone, Deserialize)]
pub struct RawClient {
    pub id: i64,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub ivr_id: Option<String>,
    #[serde(default)]
    pub default_general_address: Option<ClientAddress>,
    #[serde(default)]
    pub default_billing_address: Option<ClientAddress>,
}

/// Listing envelope for clients
#[derive(Debug, Deserialize)]
pub struct ClientsEnvelope {
    #[serde(default)]
    pub clients: Vec<RawClient>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

impl ClientsEnvelope {
    /// Convert to the walker's page shape; a missing total means the walker
    /// falls back to short-page detection.
    pub fn into_page(self) -> PageResult<RawClient> {
        let total = self.pagination.and_then(|p| p.total).unwrap_or(0) as usize;
        PageResult::new(self.clients, total)
    }
}

/// Simplified client record served from the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSummary {
    pub id: i64,
    /// Display name derived from the raw payload's address blocks
    pub name: String,
    pub dba: Option<String>,
    pub active: bool,
    pub ivr_id: Option<String>,
}

impl ClientSummary {
    /// Derive the display name: general company, billing company, general
    /// dba, billing dba, then a placeholder built from the id.
    pub fn from_raw(raw: RawClient) -> Self {
        let general = raw.default_general_address.unwrap_or_default();
        let billing = raw.default_billing_address.unwrap_or_default();

        let name = [&general.company, &billing.company, &general.dba, &billing.dba]
            .into_iter()
            .flatten()
            .find(|candidate| !candidate.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| format!("Client {}", raw.id));

        let dba = general.dba.or(billing.dba).filter(|d| !d.trim().is_empty());

        Self { id: raw.id, name, dba, active: raw.active, ivr_id: raw.ivr_id }
    }
}

/// Work-order category from `GET /api/ev1/categories`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    /// The category name (e.g. "Grease Trap")
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub active: bool,
}

/// Listing envelope for categories
#[derive(Debug, Deserialize)]
pub struct CategoriesEnvelope {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

impl CategoriesEnvelope {
    pub fn into_page(self) -> PageResult<Category> {
        let total = self.pagination.and_then(|p| p.total).unwrap_or(0) as usize;
        PageResult::new(self.categories, total)
    }
}
