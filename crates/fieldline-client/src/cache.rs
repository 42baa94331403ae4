//! Read-through snapshot cache for slow-changing reference data
//!
//! Holds one immutable snapshot of a reference collection (all clients, all
//! categories) plus refresh bookkeeping. Reads always serve the current
//! snapshot without waiting on a refresh (stale-while-revalidate); refreshes
//! are single-flight, and a failed refresh never disturbs the last good
//! snapshot.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::Result;

/// Source of truth a cache refreshes from
///
/// Production implementations compose the page walker and the request
/// pipeline; tests inject fakes.
#[async_trait]
pub trait SnapshotLoader<T>: Send + Sync {
    /// Fetch the complete collection from the remote.
    async fn load(&self) -> Result<Vec<T>>;
}

/// Point-in-time view of a cache's refresh bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStatus {
    /// When the snapshot was last successfully replaced
    pub last_refreshed: Option<DateTime<Utc>>,
    /// When a refresh was last attempted, successful or not
    pub last_attempt: Option<DateTime<Utc>>,
    /// Whether the most recent attempt succeeded
    pub last_refresh_successful: bool,
    /// Whether a refresh is running right now
    pub refreshing: bool,
    /// Number of items in the current snapshot
    pub item_count: usize,
}

#[derive(Debug)]
struct StatusFields {
    last_refreshed: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
    last_refresh_successful: bool,
}

struct Inner<T> {
    name: String,
    loader: Arc<dyn SnapshotLoader<T>>,
    /// Swapped atomically on successful refresh; readers clone the `Arc`.
    snapshot: RwLock<Arc<Vec<T>>>,
    status: RwLock<StatusFields>,
    /// Single-flight gate: at most one refresh runs at a time.
    gate: Arc<Mutex<()>>,
    /// Bumped on every successful refresh; lets a waiter detect that the
    /// refresh it queued behind already produced a fresh snapshot.
    generation: AtomicU64,
    refreshing: AtomicBool,
}

/// In-memory, process-lifetime cache of one reference collection
///
/// Created empty; populated by the first refresh (explicit or background).
/// Clones share the same underlying state.
pub struct ReferenceCache<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ReferenceCache<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: Send + Sync + 'static> ReferenceCache<T> {
    pub fn new(name: impl Into<String>, loader: Arc<dyn SnapshotLoader<T>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                loader,
                snapshot: RwLock::new(Arc::new(Vec::new())),
                status: RwLock::new(StatusFields {
                    last_refreshed: None,
                    last_attempt: None,
                    last_refresh_successful: true,
                }),
                gate: Arc::new(Mutex::new(())),
                generation: AtomicU64::new(0),
                refreshing: AtomicBool::new(false),
            }),
        }
    }

    /// Current snapshot. Never blocks on a refresh; before the first
    /// successful refresh this is the empty collection.
    pub fn get_all(&self) -> Arc<Vec<T>> {
        self.read_snapshot()
    }

    /// Whether a successful refresh has ever populated this cache.
    pub fn is_populated(&self) -> bool {
        self.inner.generation.load(Ordering::Acquire) > 0
    }

    /// First item matching the predicate, cloned out of the snapshot.
    pub fn find<F>(&self, predicate: F) -> Option<T>
    where
        T: Clone,
        F: FnMut(&&T) -> bool,
    {
        self.read_snapshot().iter().find(predicate).cloned()
    }

    /// All items matching the predicate, cloned out of the snapshot.
    pub fn filter<F>(&self, mut predicate: F) -> Vec<T>
    where
        T: Clone,
        F: FnMut(&T) -> bool,
    {
        self.read_snapshot().iter().filter(|item| predicate(item)).cloned().collect()
    }

    /// Refresh bookkeeping for status endpoints and diagnostics.
    pub fn status(&self) -> CacheStatus {
        let fields = match self.inner.status.read() {
            Ok(guard) => CacheStatus {
                last_refreshed: guard.last_refreshed,
                last_attempt: guard.last_attempt,
                last_refresh_successful: guard.last_refresh_successful,
                refreshing: false,
                item_count: 0,
            },
            Err(poisoned) => {
                let guard = poisoned.into_inner();
                CacheStatus {
                    last_refreshed: guard.last_refreshed,
                    last_attempt: guard.last_attempt,
                    last_refresh_successful: guard.last_refresh_successful,
                    refreshing: false,
                    item_count: 0,
                }
            }
        };
        CacheStatus {
            refreshing: self.inner.refreshing.load(Ordering::Acquire),
            item_count: self.read_snapshot().len(),
            ..fields
        }
    }

    /// Block until a refresh completes and return the fresh snapshot.
    ///
    /// Single-flight: if another refresh finishes while this caller waits
    /// for the gate, its snapshot is returned without fetching again. If the
    /// concurrent refresh failed, this caller runs its own attempt and
    /// surfaces its own error.
    pub async fn refresh(&self) -> Result<Arc<Vec<T>>> {
        let observed_generation = self.inner.generation.load(Ordering::Acquire);
        let _permit = self.inner.gate.lock().await;

        if self.inner.generation.load(Ordering::Acquire) != observed_generation {
            debug!(cache = %self.inner.name, "refresh satisfied by concurrent refresh");
            return Ok(self.read_snapshot());
        }

        self.run_refresh().await
    }

    /// Start a refresh without waiting for it.
    ///
    /// Returns `false` immediately if a refresh is already running (the
    /// caller's signal that it queued nothing). The outcome of a background
    /// refresh is observable only through [`status`](Self::status); failures
    /// are logged, never thrown into unrelated code.
    pub fn refresh_background(&self) -> bool {
        let Ok(permit) = Arc::clone(&self.inner.gate).try_lock_owned() else {
            warn!(cache = %self.inner.name, "refresh already in progress, skipping");
            return false;
        };

        let cache = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = cache.run_refresh().await {
                error!(cache = %cache.inner.name, error = %err, "background refresh failed");
            }
        });
        true
    }

    /// Run one refresh attempt. Caller must hold the gate.
    async fn run_refresh(&self) -> Result<Arc<Vec<T>>> {
        self.inner.refreshing.store(true, Ordering::Release);
        let started_at = Utc::now();
        debug!(cache = %self.inner.name, "refreshing snapshot");

        let outcome = self.inner.loader.load().await;
        let result = match outcome {
            Ok(items) => {
                let fresh = Arc::new(items);
                self.write_snapshot(Arc::clone(&fresh));
                self.stamp_status(started_at, true);
                self.inner.generation.fetch_add(1, Ordering::AcqRel);
                info!(cache = %self.inner.name, items = fresh.len(), "snapshot refreshed");
                Ok(fresh)
            }
            Err(err) => {
                self.stamp_status(started_at, false);
                warn!(cache = %self.inner.name, error = %err, "refresh failed, keeping prior snapshot");
                Err(err.into_cache_refresh())
            }
        };

        self.inner.refreshing.store(false, Ordering::Release);
        result
    }

    fn stamp_status(&self, attempted_at: DateTime<Utc>, succeeded: bool) {
        let mut guard = match self.inner.status.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.last_attempt = Some(attempted_at);
        guard.last_refresh_successful = succeeded;
        if succeeded {
            guard.last_refreshed = Some(attempted_at);
        }
    }

    fn read_snapshot(&self) -> Arc<Vec<T>> {
        match self.inner.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn write_snapshot(&self, fresh: Arc<Vec<T>>) {
        match self.inner.snapshot.write() {
            Ok(mut guard) => *guard = fresh,
            Err(poisoned) => *poisoned.into_inner() = fresh,
        }
    }
}
