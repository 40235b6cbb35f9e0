//! Feed items and their ranked form.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::scoring::{EngagementCounters, ScoreWeights, age_hours};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "feed_item_kind", rename_all = "snake_case")]
pub enum FeedItemKind {
    Post,
    Note,
    Event,
}

impl FeedItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Note => "note",
            Self::Event => "event",
        }
    }
}

/// A piece of content eligible for the feed, with its engagement counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: Uuid,
    pub kind: FeedItemKind,
    pub counters: EngagementCounters,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl FeedItem {
    pub fn score_at(&self, now: OffsetDateTime, weights: &ScoreWeights) -> f64 {
        self.counters
            .score(age_hours(self.created_at, now), weights)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFeedItem {
    pub item: FeedItem,
    pub score: f64,
}

/// Orders by descending score, newest first on ties, then by id for determinism.
pub fn rank(items: Vec<FeedItem>, now: OffsetDateTime, weights: &ScoreWeights) -> Vec<ScoredFeedItem> {
    let mut scored: Vec<ScoredFeedItem> = items
        .into_iter()
        .map(|item| ScoredFeedItem {
            score: item.score_at(now, weights),
            item,
        })
        .collect();
    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.item.created_at.cmp(&a.item.created_at))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    scored
}
