//! Reference-data resources and their cached directories
//!
//! The remote's slow-changing lookup collections (clients, categories) are
//! materialized through the page walker and served from snapshot caches.
//! Everything else the API exposes (work orders, visits, vendors, documents)
//! is passed through the pipeline as opaque payloads by callers.

mod categories;
mod clients;
mod models;

pub use categories::CategoryDirectory;
pub use clients::ClientDirectory;
pub use models::{
    CategoriesEnvelope, Category, ClientAddress, ClientSummary, ClientsEnvelope, Pagination,
    RawClient,
};
