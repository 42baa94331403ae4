//! Bounded aggregation of paginated collections
//!
//! [`fetch_all`] walks a paginated listing page by page, concatenating items
//! in arrival order until the remote reports exhaustion or a caller-supplied
//! page ceiling is hit. Pages are fetched strictly sequentially: concurrency
//! here would tangle with the pipeline's retry/backoff behavior and the
//! remote's rate limits.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Offset/limit window for a single page request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    /// Zero-based offset of the first item
    pub start: usize,
    /// Maximum number of items to return
    pub limit: usize,
}

impl PageRequest {
    pub fn new(start: usize, limit: usize) -> Self {
        Self { start, limit }
    }

    /// First page with the given size.
    pub fn first(limit: usize) -> Self {
        Self { start: 0, limit }
    }
}

/// One page of results plus the remote's authoritative total
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageResult<T> {
    /// Items for this window, in the remote's order
    pub items: Vec<T>,
    /// Total item count across all pages; `0` when the remote did not
    /// report one (exhaustion is then detected by a short page)
    pub total_count: usize,
}

impl<T> PageResult<T> {
    pub fn new(items: Vec<T>, total_count: usize) -> Self {
        Self { items, total_count }
    }
}

/// Fetch every page of a collection, bounded by `max_pages`.
///
/// Starts at offset 0 and advances by `page_size`, stopping at whichever
/// comes first:
/// - the accumulated item count reaches the total reported by the first
///   page (when the remote reports one),
/// - `max_pages` pages have been fetched, or
/// - a page comes back short (fewer than `page_size` items).
///
/// There is no retry here — transient-failure handling belongs to the
/// request pipeline inside `fetch_page`. A mid-walk error propagates
/// immediately and the accumulated pages are discarded: results are returned
/// only on full success.
pub async fn fetch_all<T, F, Fut>(
    mut fetch_page: F,
    page_size: usize,
    max_pages: usize,
) -> Result<Vec<T>>
where
    F: FnMut(PageRequest) -> Fut,
    Fut: Future<Output = Result<PageResult<T>>>,
{
    if page_size == 0 {
        return Err(Error::InvalidInput("page_size must be greater than 0".to_string()));
    }
    if max_pages == 0 {
        return Err(Error::InvalidInput("max_pages must be greater than 0".to_string()));
    }

    let mut all_items = Vec::new();
    let mut reported_total: Option<usize> = None;

    for page_index in 0..max_pages {
        let request = PageRequest::new(page_index * page_size, page_size);
        let page = fetch_page(request).await?;
        let fetched = page.items.len();

        if reported_total.is_none() {
            reported_total = Some(page.total_count);
        }

        all_items.extend(page.items);
        debug!(
            page = page_index + 1,
            fetched,
            accumulated = all_items.len(),
            "fetched page"
        );

        let total_reached = match reported_total {
            Some(total) if total > 0 => all_items.len() >= total,
            _ => false,
        };
        if total_reached || fetched < page_size {
            break;
        }
    }

    debug!(total = all_items.len(), "pagination walk complete");
    Ok(all_items)
}
