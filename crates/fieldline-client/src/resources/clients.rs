//! Cached directory of clients
//!
//! Walks the full client collection through the page walker and serves
//! lookups from the snapshot cache. Client data changes rarely, so reads hit
//! the snapshot and refreshes run on demand or in the background.

use std::sync::Arc;

use async_trait::async_trait;

use super::models::{ClientSummary, ClientsEnvelope};
use crate::cache::{CacheStatus, ReferenceCache, SnapshotLoader};
use crate::error::Result;
use crate::filter::FilterBuilder;
use crate::http::ApiClient;
use crate::paging::fetch_all;

const CLIENTS_ENDPOINT: &str = "/api/ev1/clients";

// Bulk-fetch bounds: 100-item pages, hard ceiling of 100 pages.
const BULK_PAGE_SIZE: usize = 100;
const MAX_BULK_PAGES: usize = 100;

struct ClientPageLoader {
    api: Arc<ApiClient>,
}

#[async_trait]
impl SnapshotLoader<ClientSummary> for ClientPageLoader {
    async fn load(&self) -> Result<Vec<ClientSummary>> {
        let api = Arc::clone(&self.api);
        let raw = fetch_all(
            |page| {
                let api = Arc::clone(&api);
                async move {
                    let envelope: ClientsEnvelope = api
                        .get_with_filters(CLIENTS_ENDPOINT, &FilterBuilder::new(), page)
                        .await?;
                    Ok(envelope.into_page())
                }
            },
            BULK_PAGE_SIZE,
            MAX_BULK_PAGES,
        )
        .await?;

        Ok(raw.into_iter().map(ClientSummary::from_raw).collect())
    }
}

/// Read-through directory of all clients
///
/// Reads never block on a refresh; before the first successful refresh the
/// directory is empty (`status().last_refreshed == None` distinguishes
/// "empty because never loaded" from "genuinely empty").
#[derive(Clone)]
pub struct ClientDirectory {
    cache: ReferenceCache<ClientSummary>,
}

impl ClientDirectory {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { cache: ReferenceCache::new("clients", Arc::new(ClientPageLoader { api })) }
    }

    /// All cached clients.
    pub fn get_all(&self) -> Arc<Vec<ClientSummary>> {
        self.cache.get_all()
    }

    /// Cached clients currently marked active.
    pub fn get_active(&self) -> Vec<ClientSummary> {
        self.cache.filter(|client| client.active)
    }

    pub fn get_by_id(&self, id: i64) -> Option<ClientSummary> {
        self.cache.find(|client| client.id == id)
    }

    /// Case-insensitive exact match on name or dba.
    pub fn get_by_name(&self, name: &str) -> Option<ClientSummary> {
        let needle = name.trim();
        if needle.is_empty() {
            return None;
        }
        self.cache.find(|client| {
            client.name.eq_ignore_ascii_case(needle)
                || client.dba.as_deref().is_some_and(|dba| dba.eq_ignore_ascii_case(needle))
        })
    }

    /// Case-insensitive exact match on IVR id.
    pub fn get_by_ivr_id(&self, ivr_id: &str) -> Option<ClientSummary> {
        let needle = ivr_id.trim();
        if needle.is_empty() {
            return None;
        }
        self.cache
            .find(|client| client.ivr_id.as_deref().is_some_and(|id| id.eq_ignore_ascii_case(needle)))
    }

    /// Case-insensitive substring search over name, dba and IVR id, sorted
    /// by name.
    pub fn search(&self, term: &str) -> Vec<ClientSummary> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut matches = self.cache.filter(|client| {
            client.name.to_lowercase().contains(&needle)
                || client.dba.as_deref().is_some_and(|d| d.to_lowercase().contains(&needle))
                || client.ivr_id.as_deref().is_some_and(|i| i.to_lowercase().contains(&needle))
        });
        matches.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        matches
    }

    /// Block until a refresh completes and return the fresh snapshot.
    pub async fn refresh(&self) -> Result<Arc<Vec<ClientSummary>>> {
        self.cache.refresh().await
    }

    /// Start a refresh without waiting; returns `false` if one is already
    /// running.
    pub fn refresh_background(&self) -> bool {
        self.cache.refresh_background()
    }

    pub fn status(&self) -> CacheStatus {
        self.cache.status()
    }
}
