//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::search::SearchHit;
use crate::domain::blocks::{Block, BlockOrder, BlockUpdate};
use crate::domain::error::DomainError;
use crate::domain::feed::FeedItem;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<DomainError> for RepoError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation { message } => Self::InvalidInput { message },
            DomainError::Invariant { message } => Self::Integrity { message },
        }
    }
}

/// A freshly computed score ready to be persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreUpdate {
    pub id: Uuid,
    pub score: f64,
}

#[async_trait]
pub trait FeedItemsRepo: Send + Sync {
    /// Items created at or after `since`, newest first, at most `limit`.
    async fn list_items_since(
        &self,
        since: OffsetDateTime,
        limit: u32,
    ) -> Result<Vec<FeedItem>, RepoError>;

    /// Ranking candidates created at or after `since`: the `top` items by
    /// stored score, plus every item whose score has not been stored since
    /// its counters last changed.
    ///
    /// Stored scores written by one rescore decay by the same factor, so
    /// their relative order still holds until counters change.
    async fn list_ranking_candidates(
        &self,
        since: OffsetDateTime,
        top: u32,
    ) -> Result<Vec<FeedItem>, RepoError>;

    async fn store_scores(
        &self,
        updates: &[ScoreUpdate],
        scored_at: OffsetDateTime,
    ) -> Result<u64, RepoError>;

    /// Removes items created before `cutoff` from the feed.
    async fn prune_before(&self, cutoff: OffsetDateTime) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait BlocksRepo: Send + Sync {
    async fn list_blocks(&self, user_id: i64) -> Result<Vec<Block>, RepoError>;

    /// Applies the whole order in one transaction. Fails with
    /// [`RepoError::NotFound`] if any id is not one of the user's blocks.
    async fn reorder_blocks(&self, user_id: i64, order: &BlockOrder) -> Result<u64, RepoError>;

    /// Replaces block contents in one transaction, all or nothing.
    async fn update_blocks(
        &self,
        user_id: i64,
        updates: &[BlockUpdate],
    ) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait SearchRepo: Send + Sync {
    /// Ranked full-text search.
    async fn search_ranked(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>, RepoError>;

    /// Case-insensitive substring match ordered by recency.
    async fn search_substring(&self, query: &str, limit: u32)
    -> Result<Vec<SearchHit>, RepoError>;
}
