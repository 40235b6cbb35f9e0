//! Feed ranking and periodic rescoring.
//!
//! Reads rank candidates with scores computed on the spot from counters and
//! the current clock, so ordering never depends on how recently the rescore
//! job ran. The job persists the same scores for items still inside the
//! retention window and prunes everything older. Persisted scores only
//! select candidates: the top items by stored score plus everything not
//! scored since its counters changed.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::Duration;
use tracing::{debug, info};

use crate::application::repos::{FeedItemsRepo, RepoError, ScoreUpdate};
use crate::cache::SharedClock;
use crate::domain::feed::{ScoredFeedItem, rank};
use crate::domain::scoring::ScoreWeights;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RescoreSummary {
    pub rescored: u64,
    pub pruned: u64,
}

#[derive(Clone)]
pub struct FeedService {
    items: Arc<dyn FeedItemsRepo>,
    weights: ScoreWeights,
    retention: Duration,
    clock: SharedClock,
}

impl FeedService {
    pub fn new(
        items: Arc<dyn FeedItemsRepo>,
        weights: ScoreWeights,
        retention: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            items,
            weights,
            retention,
            clock,
        }
    }

    pub fn weights(&self) -> &ScoreWeights {
        &self.weights
    }

    /// Top `limit` items of the retention window by decayed score.
    pub async fn ranked(&self, limit: usize) -> Result<Vec<ScoredFeedItem>, FeedError> {
        let now = self.clock.now();
        let top = u32::try_from(limit).unwrap_or(u32::MAX);
        let candidates = self
            .items
            .list_ranking_candidates(now - self.retention, top)
            .await?;
        let candidate_count = candidates.len();

        let mut ranked = rank(candidates, now, &self.weights);
        ranked.truncate(limit);
        debug!(candidates = candidate_count, returned = ranked.len(), "Ranked feed");
        Ok(ranked)
    }

    /// Persists fresh scores for retained items and prunes expired ones.
    pub async fn rescore(&self) -> Result<RescoreSummary, FeedError> {
        let now = self.clock.now();
        let cutoff = now - self.retention;

        let items = self.items.list_items_since(cutoff, u32::MAX).await?;
        let updates: Vec<ScoreUpdate> = items
            .iter()
            .map(|item| ScoreUpdate {
                id: item.id,
                score: item.score_at(now, &self.weights),
            })
            .collect();

        let rescored = self.items.store_scores(&updates, now).await?;
        let pruned = self.items.prune_before(cutoff).await?;

        info!(
            rescored,
            pruned,
            retention_days = self.retention.whole_days(),
            "Feed scores recomputed"
        );
        Ok(RescoreSummary { rescored, pruned })
    }
}
