//! Cached, Throttled Search
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐  hit   ┌──────────────────────────┐
//! │ execute_query() │───────▶│ TtlCache<SearchResults>  │
//! └───────┬─────────┘        └──────────▲───────────────┘
//!         │ miss                        │ re-check / fill (success only)
//!         ▼                             │
//! ┌─────────────────┐  worker  ┌────────┴────────┐        ┌───────────────┐
//! │ JobQueue        │─────────▶│ process_query   │───────▶│ SearchBackend │
//! └─────────────────┘          └─────────────────┘        └───────────────┘
//! ```
//!
//! Result sets are cached whole and paginated locally, so every page of the
//! same query is served by a single backend call.

mod backend;
mod executor;
mod ports;
mod types;

#[cfg(test)]
mod proptest;

pub use backend::{HttpBackend, HttpBackendConfig, InMemoryBackend};
pub use executor::{ExecutorConfig, QueryExecutor, DEFAULT_CACHE_TTL};
pub use ports::SearchBackend;
pub use types::{
    normalize_text, Document, PageStatus, SearchPage, SearchQuery, SearchRequest, SearchResults,
    Suggestions, MAX_PAGES, PAGE_SIZE,
};
