//! Property-Based Tests for Pagination and Cache Keys
//!
//! # Test Properties
//!
//! 1. **Page bounds**: `total_pages` never exceeds `MAX_PAGES` and covers every result
//!    up to that cap
//! 2. **Navigation**: `prev`/`next`/`has_prev`/`has_next` follow from the current page
//! 3. **Page slices**: every page holds at most `PAGE_SIZE` documents and pages tile the
//!    result set without overlap
//! 4. **Key stability**: the cache key ignores page, letter case and whitespace

#![cfg(test)]

use proptest::prelude::*;

use super::types::{normalize_text, Document, PageStatus, SearchQuery, SearchResults, MAX_PAGES, PAGE_SIZE};

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for query text made of a few lowercase words
fn words_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-z]{1,8}", 1..5)
}

/// Strategy for whitespace separators
fn whitespace_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec![" ", "  ", "\t", " \n ", "   "]).prop_map(str::to_string)
}

fn results_with(count: usize) -> SearchResults {
    let documents = (0..count)
        .map(|i| Document {
            id: i.to_string(),
            ..Default::default()
        })
        .collect();
    SearchResults::new("q", documents, count)
}

// =============================================================================
// Pagination Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_total_pages_bounded(total in 0usize..10_000, page in 0u32..50) {
        let status = PageStatus::compute(page, total);

        prop_assert!(status.total_pages <= MAX_PAGES);
        let needed = total.div_ceil(PAGE_SIZE);
        prop_assert_eq!(status.total_pages as usize, needed.min(MAX_PAGES as usize));
    }

    #[test]
    fn prop_navigation_consistent(total in 0usize..500, page in 0u32..20) {
        let status = PageStatus::compute(page, total);
        let current = page.max(1);

        prop_assert_eq!(status.current_page, current);
        prop_assert_eq!(status.prev_page, current - 1);
        prop_assert_eq!(status.next_page, current + 1);
        prop_assert_eq!(status.has_prev, current > 1);
        prop_assert_eq!(status.has_next, current < status.total_pages);
    }

    #[test]
    fn prop_pages_tile_results(count in 0usize..120) {
        let results = results_with(count);
        let mut seen = Vec::new();

        for page in 1..=((count / PAGE_SIZE) as u32 + 2) {
            let docs = results.page_documents(page);
            prop_assert!(docs.len() <= PAGE_SIZE);
            seen.extend(docs.iter().map(|d| d.id.clone()));
        }

        let expected: Vec<String> = (0..count).map(|i| i.to_string()).collect();
        prop_assert_eq!(seen, expected);
    }
}

// =============================================================================
// Cache Key Properties
// =============================================================================

proptest! {
    #[test]
    fn prop_key_ignores_page(words in words_strategy(), p1 in 0u32..100, p2 in 0u32..100) {
        let text = words.join(" ");
        let a = SearchQuery::new(text.clone()).with_page(p1);
        let b = SearchQuery::new(text).with_page(p2);
        prop_assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn prop_key_ignores_case_and_whitespace(
        words in words_strategy(),
        sep in whitespace_strategy(),
        upper in any::<bool>(),
    ) {
        let canonical = SearchQuery::new(words.join(" "));

        let mut messy = format!("{}{}{}", sep, words.join(&sep), sep);
        if upper {
            messy = messy.to_uppercase();
        }
        let variant = SearchQuery::new(messy);

        prop_assert_eq!(canonical.cache_key(), variant.cache_key());
    }

    #[test]
    fn prop_normalize_idempotent(text in "[ a-zA-Z\t]{0,40}") {
        let once = normalize_text(&text);
        prop_assert_eq!(normalize_text(&once), once.clone());
        prop_assert!(!once.starts_with(' '));
        prop_assert!(!once.ends_with(' '));
        prop_assert!(!once.contains("  "));
    }

    #[test]
    fn prop_distinct_text_distinct_key(a in words_strategy(), b in words_strategy()) {
        prop_assume!(a != b);
        let ka = SearchQuery::new(a.join(" ")).cache_key();
        let kb = SearchQuery::new(b.join(" ")).cache_key();
        prop_assert_ne!(ka, kb);
    }
}
