//! Cached directory of work-order categories

use std::sync::Arc;

use async_trait::async_trait;

use super::models::{CategoriesEnvelope, Category};
use crate::cache::{CacheStatus, ReferenceCache, SnapshotLoader};
use crate::error::Result;
use crate::filter::FilterBuilder;
use crate::http::ApiClient;
use crate::paging::fetch_all;

const CATEGORIES_ENDPOINT: &str = "/api/ev1/categories";

const BULK_PAGE_SIZE: usize = 100;
const MAX_BULK_PAGES: usize = 100;

struct CategoryPageLoader {
    api: Arc<ApiClient>,
}

#[async_trait]
impl SnapshotLoader<Category> for CategoryPageLoader {
    async fn load(&self) -> Result<Vec<Category>> {
        let api = Arc::clone(&self.api);
        fetch_all(
            |page| {
                let api = Arc::clone(&api);
                async move {
                    let envelope: CategoriesEnvelope = api
                        .get_with_filters(CATEGORIES_ENDPOINT, &FilterBuilder::new(), page)
                        .await?;
                    Ok(envelope.into_page())
                }
            },
            BULK_PAGE_SIZE,
            MAX_BULK_PAGES,
        )
        .await
    }
}

/// Read-through directory of work-order categories
#[derive(Clone)]
pub struct CategoryDirectory {
    cache: ReferenceCache<Category>,
}

impl CategoryDirectory {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { cache: ReferenceCache::new("categories", Arc::new(CategoryPageLoader { api })) }
    }

    pub fn get_all(&self) -> Arc<Vec<Category>> {
        self.cache.get_all()
    }

    pub fn get_active(&self) -> Vec<Category> {
        self.cache.filter(|category| category.active)
    }

    pub fn get_by_id(&self, id: i64) -> Option<Category> {
        self.cache.find(|category| category.id == id)
    }

    /// Case-insensitive exact match on the category name.
    pub fn get_by_name(&self, name: &str) -> Option<Category> {
        let needle = name.trim();
        if needle.is_empty() {
            return None;
        }
        self.cache.find(|category| category.category.eq_ignore_ascii_case(needle))
    }

    /// Case-insensitive substring search over name and description.
    pub fn search(&self, term: &str) -> Vec<Category> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        let mut matches = self.cache.filter(|category| {
            category.category.to_lowercase().contains(&needle)
                || category
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&needle))
        });
        matches.sort_by(|a, b| a.category.to_lowercase().cmp(&b.category.to_lowercase()));
        matches
    }

    pub async fn refresh(&self) -> Result<Arc<Vec<Category>>> {
        self.cache.refresh().await
    }

    pub fn refresh_background(&self) -> bool {
        self.cache.refresh_background()
    }

    pub fn status(&self) -> CacheStatus {
        self.cache.status()
    }
}
