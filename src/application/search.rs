//! Content search with a substring fallback.

use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::application::repos::{RepoError, SearchRepo};
use crate::cache::{CacheError, QueryCache, QuerySpec, Tag};
use crate::domain::feed::FeedItemKind;

pub const SEARCH_TAG: &str = "search";
const DEFAULT_LIMIT: u32 = 20;
const METRIC_FALLBACK: &str = "crunevo_search_fallback_total";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub kind: FeedItemKind,
    pub title: String,
    pub snippet: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Text-search rank; absent for substring matches.
    pub rank: Option<f64>,
}

#[derive(Clone)]
pub struct SearchService {
    repo: Arc<dyn SearchRepo>,
    cache: Arc<QueryCache>,
    limit: u32,
}

impl SearchService {
    pub fn new(repo: Arc<dyn SearchRepo>, cache: Arc<QueryCache>) -> Self {
        Self {
            repo,
            cache,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let spec = QuerySpec::new("search.content").with_tag(Tag::new(SEARCH_TAG)?);
        let key = spec
            .key()
            .arg(query)
            .kwarg("limit", &self.limit)
            .build()?;
        self.cache
            .cached(&spec, key, || self.search_uncached(query))
            .await
    }

    async fn search_uncached(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        match self.repo.search_ranked(query, self.limit).await {
            Ok(hits) => Ok(hits),
            Err(err) => {
                counter!(METRIC_FALLBACK).increment(1);
                warn!(
                    query,
                    error = %err,
                    "Ranked text search failed; falling back to substring match"
                );
                Ok(self.repo.search_substring(query, self.limit).await?)
            }
        }
    }

    /// Drops every cached search result, e.g. after content changes.
    pub fn invalidate(&self) -> Result<usize, SearchError> {
        Ok(self.cache.invalidate_tags([&Tag::new(SEARCH_TAG)?]))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use time::macros::datetime;

    use super::*;
    use crate::cache::{CacheConfig, system_clock};

    #[derive(Default)]
    struct StubSearch {
        ranked_fails: AtomicBool,
        substring_fails: AtomicBool,
        calls: AtomicUsize,
    }

    fn hit(title: &str, rank: Option<f64>) -> SearchHit {
        SearchHit {
            id: Uuid::nil(),
            kind: FeedItemKind::Post,
            title: title.to_string(),
            snippet: String::new(),
            created_at: datetime!(2024-01-01 00:00 UTC),
            rank,
        }
    }

    #[async_trait]
    impl SearchRepo for StubSearch {
        async fn search_ranked(&self, query: &str, _limit: u32) -> Result<Vec<SearchHit>, RepoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.ranked_fails.load(Ordering::SeqCst) {
                return Err(RepoError::from_persistence("text search configuration missing"));
            }
            Ok(vec![hit(query, Some(0.5))])
        }

        async fn search_substring(
            &self,
            query: &str,
            _limit: u32,
        ) -> Result<Vec<SearchHit>, RepoError> {
            if self.substring_fails.load(Ordering::SeqCst) {
                return Err(RepoError::Timeout);
            }
            Ok(vec![hit(query, None)])
        }
    }

    fn service(repo: Arc<StubSearch>) -> SearchService {
        let cache = Arc::new(QueryCache::new(&CacheConfig::default(), system_clock()));
        SearchService::new(repo, cache)
    }

    #[tokio::test]
    async fn ranked_results_are_cached() {
        let repo = Arc::new(StubSearch::default());
        let search = service(repo.clone());

        let hits = search.search("  algebra ").await.expect("search");
        assert_eq!(hits[0].rank, Some(0.5));
        assert_eq!(hits[0].title, "algebra");
        search.search("algebra").await.expect("search");
        assert_eq!(repo.calls.load(Ordering::SeqCst), 1);

        assert_eq!(search.invalidate().expect("invalidate"), 1);
        search.search("algebra").await.expect("search");
        assert_eq!(repo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ranked_failure_falls_back_to_substring() {
        let repo = Arc::new(StubSearch::default());
        repo.ranked_fails.store(true, Ordering::SeqCst);
        let hits = service(repo).search("física").await.expect("fallback");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].rank, None);
    }

    #[tokio::test]
    async fn fallback_failure_is_returned() {
        let repo = Arc::new(StubSearch::default());
        repo.ranked_fails.store(true, Ordering::SeqCst);
        repo.substring_fails.store(true, Ordering::SeqCst);
        let err = service(repo).search("x").await.expect_err("both failed");
        assert!(matches!(err, SearchError::Repo(RepoError::Timeout)));
    }

    #[tokio::test]
    async fn blank_queries_skip_storage() {
        let repo = Arc::new(StubSearch::default());
        assert!(service(repo.clone()).search("   ").await.expect("empty").is_empty());
        assert_eq!(repo.calls.load(Ordering::SeqCst), 0);
    }
}
