//! Search Value Types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Results per page
pub const PAGE_SIZE: usize = 10;

/// Pages ever offered to a user
pub const MAX_PAGES: u32 = 10;

/// A user's search: free text, facet filters and the page they want
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Free text
    pub text: String,
    /// Facet name -> accepted values
    pub filters: BTreeMap<String, Vec<String>>,
    /// 1-based page number; 0 is treated as 1
    pub page: u32,
}

impl SearchQuery {
    /// Query for the first page with no filters
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            filters: BTreeMap::new(),
            page: 1,
        }
    }

    /// Set the requested page
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    /// Add accepted values for a facet
    pub fn with_filter<I, S>(mut self, facet: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters
            .entry(facet.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Requested page, with 0 mapped to 1
    pub fn effective_page(&self) -> u32 {
        self.page.max(1)
    }

    /// Text trimmed, lowercased, with inner whitespace runs collapsed
    pub fn normalized_text(&self) -> String {
        normalize_text(&self.text)
    }

    /// Cache key identifying the full result set of this query.
    ///
    /// Derived from [`to_request`](Self::to_request): two queries share a key
    /// exactly when the backend would receive the same request, so page,
    /// letter case and whitespace never split a key.
    pub fn cache_key(&self) -> String {
        self.to_request().cache_key()
    }

    /// What the backend receives: page-independent, with canonical filters
    pub fn to_request(&self) -> SearchRequest {
        SearchRequest {
            text: self.normalized_text(),
            filters: canonical_filters(&self.filters),
        }
    }
}

/// Facet names and values trimmed, values sorted and deduplicated, facets
/// left without values dropped
fn canonical_filters(filters: &BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>> {
    let mut canonical: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (facet, values) in filters {
        let facet = facet.trim();
        if facet.is_empty() {
            continue;
        }
        canonical.entry(facet.to_string()).or_default().extend(
            values
                .iter()
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        );
    }
    canonical.retain(|_, values| {
        values.sort_unstable();
        values.dedup();
        !values.is_empty()
    });
    canonical
}

/// Trim, lowercase and collapse inner whitespace
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Request passed to a [`SearchBackend`](super::SearchBackend)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Normalized query text
    pub text: String,
    /// Facet filters
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
}

impl SearchRequest {
    /// Result cache key.
    ///
    /// Every segment is escaped, so the separators never occur inside one
    /// and distinct requests never share a key.
    pub fn cache_key(&self) -> String {
        let mut key: String = self.text.escape_debug().collect();
        for (facet, values) in &self.filters {
            key.push('\u{1f}');
            key.extend(facet.escape_debug());
            for value in values {
                key.push('\u{1e}');
                key.extend(value.escape_debug());
            }
        }
        key
    }
}

/// A single matching document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub uri: String,
    pub excerpt: String,
    /// Page of the source document the excerpt comes from
    pub excerpt_page: Option<u32>,
    pub image_url: Option<String>,
    /// Facet values (authors, source, file type, ...)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Document {
    /// Whether the document carries at least one accepted value of every
    /// filtered facet
    pub fn matches_filters(&self, filters: &BTreeMap<String, Vec<String>>) -> bool {
        filters.iter().all(|(facet, accepted)| {
            if accepted.is_empty() {
                return true;
            }
            self.attributes.get(facet).is_some_and(|values| {
                values
                    .iter()
                    .any(|v| accepted.iter().any(|a| a.trim().eq_ignore_ascii_case(v.trim())))
            })
        })
    }
}

/// Complete, page-independent result of one backend query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Normalized query text
    pub query: String,
    /// All returned documents, in backend rank order
    pub documents: Vec<Document>,
    /// Total matches reported by the backend
    pub total_count: usize,
    /// When the backend answered
    pub fetched_at: DateTime<Utc>,
}

impl SearchResults {
    pub fn new(query: impl Into<String>, documents: Vec<Document>, total_count: usize) -> Self {
        Self {
            query: query.into(),
            documents,
            total_count,
            fetched_at: Utc::now(),
        }
    }

    /// Documents that fall on `page` (1-based, 0 treated as 1)
    pub fn page_documents(&self, page: u32) -> &[Document] {
        let page = page.max(1) as usize;
        let start = (page - 1).saturating_mul(PAGE_SIZE);
        if start >= self.documents.len() {
            return &[];
        }
        let end = (start + PAGE_SIZE).min(self.documents.len());
        &self.documents[start..end]
    }
}

/// Pagination metadata for one page of results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageStatus {
    pub current_page: u32,
    pub prev_page: u32,
    pub next_page: u32,
    pub has_prev: bool,
    pub has_next: bool,
    pub total_pages: u32,
}

impl PageStatus {
    /// Compute pagination for `page` out of `total_count` matches
    pub fn compute(page: u32, total_count: usize) -> Self {
        let current_page = page.max(1);
        let total_pages = total_count
            .div_ceil(PAGE_SIZE)
            .min(MAX_PAGES as usize) as u32;

        Self {
            current_page,
            prev_page: current_page - 1,
            next_page: current_page.saturating_add(1),
            has_prev: current_page > 1,
            has_next: current_page < total_pages,
            total_pages,
        }
    }
}

/// One page of results returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    /// Normalized query text
    pub query: String,
    /// Documents on the requested page
    pub documents: Vec<Document>,
    /// Total matches
    pub total_count: usize,
    pub page_status: PageStatus,
    /// Whether the result set came from the cache
    pub from_cache: bool,
}

impl SearchPage {
    /// Slice `page` out of a full result set
    pub fn from_results(results: &SearchResults, page: u32, from_cache: bool) -> Self {
        Self {
            query: results.query.clone(),
            documents: results.page_documents(page).to_vec(),
            total_count: results.total_count,
            page_status: PageStatus::compute(page, results.total_count),
            from_cache,
        }
    }
}

/// Query completions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestions {
    /// Text the suggestions complete
    pub query: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
}
