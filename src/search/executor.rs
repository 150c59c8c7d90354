//! Query Executor
//!
//! Answers search queries from the cache when possible and otherwise through
//! a bounded job queue in front of the backend.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::ports::SearchBackend;
use super::types::{SearchPage, SearchQuery, SearchRequest, SearchResults, Suggestions};
use crate::cache::{CacheMetricsSnapshot, TtlCache, DEFAULT_SWEEP_INTERVAL};
use crate::error::{Error, Result};
use crate::queue::{JobQueue, QueueConfig, QueueMetricsSnapshot};
use crate::task::BackgroundTask;

/// How long a successful result set stays cached
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Query executor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Queue in front of backend queries
    pub query_queue: QueueConfig,

    /// Queue in front of backend suggestions
    pub suggest_queue: QueueConfig,

    /// Lifetime of a cached result set
    #[serde(with = "crate::config::duration_secs")]
    pub cache_ttl: Duration,

    /// Interval between cache expiry sweeps
    #[serde(with = "crate::config::duration_secs")]
    pub sweep_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            query_queue: QueueConfig::default(),
            suggest_queue: QueueConfig::default(),
            cache_ttl: DEFAULT_CACHE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Backend query job: the cache key travels with the request so the worker
/// can re-check and fill the cache.
#[derive(Debug)]
struct QueryJob {
    key: String,
    request: SearchRequest,
}

/// Result set plus whether the worker found it in the cache
type QueryOutcome = Result<(Arc<SearchResults>, bool)>;

/// Cached, throttled access to a [`SearchBackend`]
pub struct QueryExecutor<B: SearchBackend> {
    config: ExecutorConfig,
    backend: Arc<B>,
    cache: Arc<TtlCache<Arc<SearchResults>>>,
    queries: JobQueue<QueryJob, QueryOutcome>,
    suggestions: JobQueue<String, Result<Suggestions>>,
    sweep: BackgroundTask,
}

impl<B: SearchBackend> QueryExecutor<B> {
    /// Build the cache, its sweep task and both job queues.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(backend: B, config: ExecutorConfig) -> Self {
        let backend = Arc::new(backend);
        let cache: Arc<TtlCache<Arc<SearchResults>>> = Arc::new(TtlCache::new());
        let sweep = cache.spawn_expiry_sweep(config.sweep_interval);

        let queries = {
            let backend = backend.clone();
            let cache = cache.clone();
            let ttl = config.cache_ttl;
            JobQueue::with_config(config.query_queue, move |job: QueryJob| {
                let backend = backend.clone();
                let cache = cache.clone();
                async move { process_query(backend.as_ref(), &cache, job, ttl).await }
            })
        };

        let suggestions = {
            let backend = backend.clone();
            JobQueue::with_config(config.suggest_queue, move |text: String| {
                let backend = backend.clone();
                async move {
                    backend.suggest(&text).await.inspect_err(|e| {
                        error!(backend = backend.name(), error = %e, "Backend suggest failed");
                    })
                }
            })
        };

        info!(
            backend = backend.name(),
            cache_ttl = ?config.cache_ttl,
            "Query executor started"
        );

        Self {
            config,
            backend,
            cache,
            queries,
            suggestions,
            sweep,
        }
    }

    /// Answer one page of `query`.
    ///
    /// A cache hit never touches the queue. On a miss the full result set is
    /// fetched through the queue; a backend failure is returned and not cached.
    #[instrument(skip(self, cancel, query), fields(query = %query.text, page = query.page))]
    pub async fn execute_query(
        &self,
        cancel: &CancellationToken,
        query: &SearchQuery,
    ) -> Result<SearchPage> {
        let request = query.to_request();
        if request.text.is_empty() {
            return Err(Error::InvalidQuery("query text is empty".to_string()));
        }

        let key = request.cache_key();
        let page = query.effective_page();

        if let Some(results) = self.cache.get(&key) {
            debug!(%key, "Cache hit");
            return Ok(SearchPage::from_results(&results, page, true));
        }

        debug!(%key, "Cache miss, enqueueing backend query");
        let (results, from_cache) = self.queries.enqueue(cancel, QueryJob { key, request }).await??;
        Ok(SearchPage::from_results(&results, page, from_cache))
    }

    /// Fetch completions for partial input through the suggestion queue.
    ///
    /// Blank input returns no suggestions without calling the backend.
    #[instrument(skip(self, cancel))]
    pub async fn suggest(&self, cancel: &CancellationToken, text: &str) -> Result<Suggestions> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Suggestions::default());
        }
        self.suggestions.enqueue(cancel, text.to_string()).await?
    }

    /// Drop the cached result set of `query`; returns whether one was cached
    pub fn invalidate(&self, query: &SearchQuery) -> bool {
        self.cache.delete(&query.cache_key())
    }

    /// Stop the cache sweep and shut both queues down within `grace`
    #[instrument(skip(self))]
    pub async fn shutdown(&self, grace: Duration) -> Result<()> {
        info!("Shutting down query executor");
        self.sweep.shutdown().await;

        let (queries, suggestions) = tokio::join!(
            self.queries.shutdown(grace),
            self.suggestions.shutdown(grace)
        );
        queries.and(suggestions)
    }

    /// Whether shutdown has started
    pub fn is_stopped(&self) -> bool {
        self.queries.is_stopped()
    }

    /// The backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Configuration in effect
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Entries currently cached
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    pub fn cache_stats(&self) -> CacheMetricsSnapshot {
        self.cache.stats()
    }

    pub fn query_queue_metrics(&self) -> QueueMetricsSnapshot {
        self.queries.metrics()
    }

    pub fn suggest_queue_metrics(&self) -> QueueMetricsSnapshot {
        self.suggestions.metrics()
    }
}

impl<B: SearchBackend> std::fmt::Debug for QueryExecutor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("cached_entries", &self.cache.len())
            .finish()
    }
}

/// Worker-side processing of one query job
async fn process_query<B: SearchBackend>(
    backend: &B,
    cache: &TtlCache<Arc<SearchResults>>,
    job: QueryJob,
    ttl: Duration,
) -> QueryOutcome {
    // An identical query queued ahead of this one may have filled the cache.
    if let Some(results) = cache.get(&job.key) {
        debug!(key = %job.key, "Answered queued job from cache");
        return Ok((results, true));
    }

    match backend.query(&job.request).await {
        Ok(results) => {
            let results = Arc::new(results);
            debug!(
                key = %job.key,
                documents = results.documents.len(),
                total = results.total_count,
                "Backend query succeeded, caching result"
            );
            cache.set(job.key, results.clone(), ttl);
            Ok((results, false))
        }
        Err(e) => {
            error!(backend = backend.name(), key = %job.key, error = %e, "Backend query failed");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Document, InMemoryBackend};
    use assert_matches::assert_matches;

    fn corpus(n: usize) -> Vec<Document> {
        (0..n)
            .map(|i| Document {
                id: i.to_string(),
                title: format!("Water report {}", i),
                excerpt: "rivers and drought".into(),
                ..Default::default()
            })
            .collect()
    }

    fn executor(backend: InMemoryBackend) -> QueryExecutor<InMemoryBackend> {
        QueryExecutor::new(backend, ExecutorConfig::default())
    }

    #[tokio::test]
    async fn test_second_identical_query_served_from_cache() {
        let exec = executor(InMemoryBackend::new(corpus(3)));
        let cancel = CancellationToken::new();
        let query = SearchQuery::new("water");

        let first = exec.execute_query(&cancel, &query).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.total_count, 3);

        let second = exec.execute_query(&cancel, &query).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.documents, first.documents);
        assert_eq!(exec.backend().query_calls(), 1);
        assert_eq!(exec.query_queue_metrics().submitted, 1);
    }

    #[tokio::test]
    async fn test_pages_share_one_backend_call() {
        let exec = executor(InMemoryBackend::new(corpus(25)));
        let cancel = CancellationToken::new();

        let p1 = exec
            .execute_query(&cancel, &SearchQuery::new("Water").with_page(1))
            .await
            .unwrap();
        let p3 = exec
            .execute_query(&cancel, &SearchQuery::new("  water ").with_page(3))
            .await
            .unwrap();

        assert_eq!(p1.documents.len(), 10);
        assert_eq!(p3.documents.len(), 5);
        assert_eq!(p3.page_status.total_pages, 3);
        assert!(!p3.page_status.has_next);
        assert!(p3.from_cache);
        assert_eq!(exec.backend().query_calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let exec = executor(InMemoryBackend::new(corpus(2)));
        let cancel = CancellationToken::new();
        let query = SearchQuery::new("water");

        exec.backend().set_failing(true);
        let err = exec.execute_query(&cancel, &query).await.unwrap_err();
        assert_matches!(err, Error::Backend(_));
        assert_eq!(exec.cached_entries(), 0);

        exec.backend().set_failing(false);
        let page = exec.execute_query(&cancel, &query).await.unwrap();
        assert!(!page.from_cache);
        assert_eq!(exec.backend().query_calls(), 2);
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let exec = executor(InMemoryBackend::new(corpus(2)));
        let cancel = CancellationToken::new();

        let err = exec
            .execute_query(&cancel, &SearchQuery::new("   "))
            .await
            .unwrap_err();
        assert_matches!(err, Error::InvalidQuery(_));
        assert_eq!(exec.backend().query_calls(), 0);
    }

    #[tokio::test]
    async fn test_queued_duplicates_answered_from_cache() {
        let backend = InMemoryBackend::new(corpus(4)).with_latency(Duration::from_millis(20));
        let config = ExecutorConfig {
            query_queue: QueueConfig::new(1, 8),
            ..Default::default()
        };
        let exec = Arc::new(QueryExecutor::new(backend, config));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let exec = exec.clone();
            handles.push(tokio::spawn(async move {
                exec.execute_query(&CancellationToken::new(), &SearchQuery::new("drought"))
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().total_count, 4);
        }

        assert_eq!(exec.backend().query_calls(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_caller() {
        let exec = executor(InMemoryBackend::new(corpus(2)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = exec
            .execute_query(&cancel, &SearchQuery::new("water"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::Cancelled);
        assert_eq!(exec.backend().query_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entry_expires_after_ttl() {
        let config = ExecutorConfig {
            cache_ttl: Duration::from_millis(100),
            ..Default::default()
        };
        let exec = QueryExecutor::new(InMemoryBackend::new(corpus(1)), config);
        let cancel = CancellationToken::new();
        let query = SearchQuery::new("water");

        exec.execute_query(&cancel, &query).await.unwrap();
        tokio::time::advance(Duration::from_millis(150)).await;

        let page = exec.execute_query(&cancel, &query).await.unwrap();
        assert!(!page.from_cache);
        assert_eq!(exec.backend().query_calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let exec = executor(InMemoryBackend::new(corpus(1)));
        let cancel = CancellationToken::new();
        let query = SearchQuery::new("water");

        exec.execute_query(&cancel, &query).await.unwrap();
        assert!(exec.invalidate(&query.clone().with_page(4)));
        assert!(!exec.invalidate(&query));

        exec.execute_query(&cancel, &query).await.unwrap();
        assert_eq!(exec.backend().query_calls(), 2);
    }

    #[tokio::test]
    async fn test_suggest() {
        let exec = executor(InMemoryBackend::new(corpus(2)));
        let cancel = CancellationToken::new();

        let s = exec.suggest(&cancel, "wat").await.unwrap();
        assert_eq!(s.suggestions.len(), 2);

        let blank = exec.suggest(&cancel, "  ").await.unwrap();
        assert!(blank.suggestions.is_empty());
        assert_eq!(exec.backend().suggest_calls(), 1);
        assert_eq!(exec.suggest_queue_metrics().completed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_intake() {
        let exec = executor(InMemoryBackend::new(corpus(1)));
        let cancel = CancellationToken::new();

        exec.execute_query(&cancel, &SearchQuery::new("water")).await.unwrap();
        exec.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(exec.is_stopped());

        let err = exec
            .execute_query(&cancel, &SearchQuery::new("drought"))
            .await
            .unwrap_err();
        assert_matches!(err, Error::QueueStopped);

        // Second shutdown is harmless.
        exec.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn test_config_defaults_from_yaml() {
        let config: ExecutorConfig =
            serde_yaml::from_str("cache_ttl: 120\nquery_queue:\n  worker_count: 3\n").unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(120));
        assert_eq!(config.query_queue.worker_count, 3);
        assert_eq!(config.sweep_interval, DEFAULT_SWEEP_INTERVAL);
        assert_eq!(config.suggest_queue, QueueConfig::default());
    }
}
