//! Search Backend Port
//!
//! The executor depends only on this trait; adapters in
//! [`backend`](super::backend) provide concrete implementations.

use std::sync::Arc;

use async_trait::async_trait;

use super::types::{SearchRequest, SearchResults, Suggestions};
use crate::error::Result;

/// External search service.
///
/// Calls are slow and rate-limited upstream, so the executor funnels them
/// through a bounded job queue.
#[async_trait]
pub trait SearchBackend: Send + Sync + 'static {
    /// Run a query and return the complete result set
    async fn query(&self, request: &SearchRequest) -> Result<SearchResults>;

    /// Return query completions for partial input
    async fn suggest(&self, text: &str) -> Result<Suggestions>;

    /// Short name used in log output
    fn name(&self) -> &str {
        "backend"
    }
}

#[async_trait]
impl<B: SearchBackend + ?Sized> SearchBackend for Arc<B> {
    async fn query(&self, request: &SearchRequest) -> Result<SearchResults> {
        (**self).query(request).await
    }

    async fn suggest(&self, text: &str) -> Result<Suggestions> {
        (**self).suggest(text).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
