//! Search Backend Adapters
//!
//! - [`InMemoryBackend`]: keyword match over a fixed document list, with
//!   optional artificial latency and failure injection.
//! - [`HttpBackend`]: JSON search service reached over HTTP.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::ports::SearchBackend;
use super::types::{Document, SearchRequest, SearchResults, Suggestions};
use crate::error::{Error, Result};

/// Maximum completions returned by [`InMemoryBackend::suggest`]
const MAX_SUGGESTIONS: usize = 5;

// =============================================================================
// In-Memory Backend
// =============================================================================

/// In-memory backend for tests and local runs
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    documents: Vec<Document>,
    latency: Duration,
    failing: AtomicBool,
    query_calls: AtomicU64,
    suggest_calls: AtomicU64,
}

impl InMemoryBackend {
    /// Create a backend serving `documents`
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            documents,
            ..Default::default()
        }
    }

    /// Load documents from a JSON array file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let documents: Vec<Document> = serde_json::from_str(&raw)?;
        debug!(
            path = %path.as_ref().display(),
            documents = documents.len(),
            "Loaded in-memory corpus"
        );
        Ok(Self::new(documents))
    }

    /// Delay every call by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make subsequent calls fail (or succeed again)
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `query` calls served so far
    pub fn query_calls(&self) -> u64 {
        self.query_calls.load(Ordering::SeqCst)
    }

    /// Number of `suggest` calls served so far
    pub fn suggest_calls(&self) -> u64 {
        self.suggest_calls.load(Ordering::SeqCst)
    }

    /// Number of documents in the corpus
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the corpus is empty
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    async fn simulate_call(&self) -> Result<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Backend("in-memory backend set to fail".to_string()));
        }
        Ok(())
    }

    fn matches(document: &Document, terms: &[&str]) -> bool {
        let haystack = format!("{} {}", document.title, document.excerpt).to_lowercase();
        terms.iter().all(|term| haystack.contains(term))
    }
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn query(&self, request: &SearchRequest) -> Result<SearchResults> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await?;

        let text = request.text.to_lowercase();
        let terms: Vec<&str> = text.split_whitespace().collect();
        let documents: Vec<Document> = self
            .documents
            .iter()
            .filter(|doc| Self::matches(doc, &terms) && doc.matches_filters(&request.filters))
            .cloned()
            .collect();

        let total = documents.len();
        Ok(SearchResults::new(request.text.clone(), documents, total))
    }

    async fn suggest(&self, text: &str) -> Result<Suggestions> {
        self.suggest_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_call().await?;

        let prefix = text.trim().to_lowercase();
        let mut suggestions = Vec::new();
        if !prefix.is_empty() {
            for doc in &self.documents {
                let title = doc.title.to_lowercase();
                if title.starts_with(&prefix) || title.contains(&format!(" {}", prefix)) {
                    if !suggestions.contains(&doc.title) {
                        suggestions.push(doc.title.clone());
                    }
                    if suggestions.len() >= MAX_SUGGESTIONS {
                        break;
                    }
                }
            }
        }

        Ok(Suggestions {
            query: text.to_string(),
            suggestions,
        })
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

// =============================================================================
// HTTP Backend
// =============================================================================

/// HTTP backend configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpBackendConfig {
    /// Base URL; `/query` and `/suggest` are appended
    pub base_url: String,

    /// Per-request timeout
    #[serde(with = "crate::config::duration_secs")]
    pub timeout: Duration,
}

impl Default for HttpBackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    documents: Vec<Document>,
    total_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct SuggestResponse {
    #[serde(default)]
    suggestions: Vec<String>,
}

/// Search backend reached over HTTP with JSON bodies
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: Client,
}

impl HttpBackend {
    /// Create a backend with its own HTTP client
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn suggest_url(&self, text: &str) -> String {
        format!("{}?q={}", self.url("suggest"), urlencoding::encode(text))
    }

    async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        warn!(%status, what, "Search backend returned an error status");
        Err(Error::Backend(format!("{} failed with {}: {}", what, status, body)))
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.config.base_url)
            .field("timeout", &self.config.timeout)
            .finish()
    }
}

#[async_trait]
impl SearchBackend for HttpBackend {
    #[instrument(skip(self, request), fields(query = %request.text))]
    async fn query(&self, request: &SearchRequest) -> Result<SearchResults> {
        let response = self
            .client
            .post(self.url("query"))
            .json(request)
            .send()
            .await
            .map_err(Error::BackendConnection)?;
        let response = Self::check_status(response, "query").await?;

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Malformed query response: {}", e)))?;

        let total = body.total_count.unwrap_or(body.documents.len());
        debug!(documents = body.documents.len(), total, "Backend query answered");
        Ok(SearchResults::new(request.text.clone(), body.documents, total))
    }

    #[instrument(skip(self))]
    async fn suggest(&self, text: &str) -> Result<Suggestions> {
        let response = self
            .client
            .get(self.suggest_url(text))
            .send()
            .await
            .map_err(Error::BackendConnection)?;
        let response = Self::check_status(response, "suggest").await?;

        let body: SuggestResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Malformed suggest response: {}", e)))?;

        Ok(Suggestions {
            query: text.to_string(),
            suggestions: body.suggestions,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn corpus() -> Vec<Document> {
        let mut un = Document {
            id: "1".into(),
            title: "Peacebuilding in West Africa".into(),
            excerpt: "Community dialogue and water access".into(),
            ..Default::default()
        };
        un.attributes.insert("source".into(), vec!["UN".into()]);

        vec![
            un,
            Document {
                id: "2".into(),
                title: "Water Governance".into(),
                excerpt: "Transboundary rivers".into(),
                ..Default::default()
            },
            Document {
                id: "3".into(),
                title: "Election Violence".into(),
                excerpt: "Case studies".into(),
                ..Default::default()
            },
        ]
    }

    #[tokio::test]
    async fn test_in_memory_query_matches_all_terms() {
        let backend = InMemoryBackend::new(corpus());
        let request = SearchRequest {
            text: "water".into(),
            filters: BTreeMap::new(),
        };

        let results = backend.query(&request).await.unwrap();
        assert_eq!(results.total_count, 2);
        assert_eq!(backend.query_calls(), 1);

        let request = SearchRequest {
            text: "water governance".into(),
            filters: BTreeMap::new(),
        };
        let results = backend.query(&request).await.unwrap();
        assert_eq!(results.documents.len(), 1);
        assert_eq!(results.documents[0].id, "2");
    }

    #[tokio::test]
    async fn test_in_memory_query_applies_filters() {
        let backend = InMemoryBackend::new(corpus());
        let mut filters = BTreeMap::new();
        filters.insert("source".to_string(), vec!["un".to_string()]);

        let results = backend
            .query(&SearchRequest {
                text: "water".into(),
                filters,
            })
            .await
            .unwrap();
        assert_eq!(results.total_count, 1);
        assert_eq!(results.documents[0].id, "1");
    }

    #[tokio::test]
    async fn test_in_memory_failure_injection() {
        let backend = InMemoryBackend::new(corpus());
        backend.set_failing(true);

        let err = backend.query(&SearchRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::Backend(_)));

        backend.set_failing(false);
        assert!(backend.query(&SearchRequest::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_in_memory_suggest() {
        let backend = InMemoryBackend::new(corpus());

        let s = backend.suggest("wat").await.unwrap();
        assert_eq!(s.suggestions, vec!["Water Governance".to_string()]);

        let s = backend.suggest("afr").await.unwrap();
        assert_eq!(s.suggestions, vec!["Peacebuilding in West Africa".to_string()]);

        assert!(backend.suggest("  ").await.unwrap().suggestions.is_empty());
        assert_eq!(backend.suggest_calls(), 3);
    }

    #[test]
    fn test_http_urls() {
        let backend = HttpBackend::new(HttpBackendConfig {
            base_url: "http://search.local/api/".into(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        assert_eq!(backend.url("query"), "http://search.local/api/query");
        assert_eq!(
            backend.suggest_url("water rights"),
            "http://search.local/api/suggest?q=water%20rights"
        );
        assert!(format!("{:?}", backend).contains("search.local"));
    }

    #[test]
    fn test_http_config_from_yaml() {
        let config: HttpBackendConfig =
            serde_yaml::from_str("base_url: http://example.org\ntimeout: 3").unwrap();
        assert_eq!(config.base_url, "http://example.org");
        assert_eq!(config.timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_http_connection_error() {
        // Nothing listens on port 9 of the loopback interface.
        let backend = HttpBackend::new(HttpBackendConfig {
            base_url: "http://127.0.0.1:9".into(),
            timeout: Duration::from_millis(500),
        })
        .unwrap();

        let err = backend.query(&SearchRequest::default()).await.unwrap_err();
        assert!(matches!(err, Error::BackendConnection(_)));
    }
}
