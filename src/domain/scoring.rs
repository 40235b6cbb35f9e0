//! Engagement scoring with exponential time decay.
//!
//! ```text
//! raw   = like_weight * likes + download_weight * downloads + comment_weight * comments
//! decay = 0.5 ^ (max(age_hours, 0) / half_life_hours)
//! score = raw * decay
//! ```
//!
//! The score is a pure function of weights, counters and age; it is never
//! stored as an authoritative value.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::error::DomainError;

pub const DEFAULT_LIKE_WEIGHT: f64 = 4.0;
pub const DEFAULT_DOWNLOAD_WEIGHT: f64 = 2.0;
pub const DEFAULT_COMMENT_WEIGHT: f64 = 1.0;
pub const DEFAULT_HALF_LIFE_HOURS: f64 = 24.0;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Validated scoring weights. All four values are finite and strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreWeights {
    like: f64,
    download: f64,
    comment: f64,
    half_life_hours: f64,
}

impl ScoreWeights {
    pub fn new(
        like: f64,
        download: f64,
        comment: f64,
        half_life_hours: f64,
    ) -> Result<Self, DomainError> {
        ensure_positive("like_weight", like)?;
        ensure_positive("download_weight", download)?;
        ensure_positive("comment_weight", comment)?;
        ensure_positive("half_life_hours", half_life_hours)?;
        Ok(Self {
            like,
            download,
            comment,
            half_life_hours,
        })
    }

    pub fn like(&self) -> f64 {
        self.like
    }

    pub fn download(&self) -> f64 {
        self.download
    }

    pub fn comment(&self) -> f64 {
        self.comment
    }

    pub fn half_life_hours(&self) -> f64 {
        self.half_life_hours
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            like: DEFAULT_LIKE_WEIGHT,
            download: DEFAULT_DOWNLOAD_WEIGHT,
            comment: DEFAULT_COMMENT_WEIGHT,
            half_life_hours: DEFAULT_HALF_LIFE_HOURS,
        }
    }
}

fn ensure_positive(name: &str, value: f64) -> Result<(), DomainError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DomainError::validation(format!(
            "{name} must be a finite positive number, got {value}"
        )))
    }
}

/// Engagement counters of one feed item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounters {
    pub likes: u64,
    pub downloads: u64,
    pub comments: u64,
}

impl EngagementCounters {
    pub fn new(likes: u64, downloads: u64, comments: u64) -> Self {
        Self {
            likes,
            downloads,
            comments,
        }
    }

    /// Converts counters as stored (signed integer columns), rejecting negatives.
    pub fn from_stored(likes: i64, downloads: i64, comments: i64) -> Result<Self, DomainError> {
        Ok(Self {
            likes: non_negative("likes", likes)?,
            downloads: non_negative("downloads", downloads)?,
            comments: non_negative("comments", comments)?,
        })
    }

    pub fn raw_score(&self, weights: &ScoreWeights) -> f64 {
        weights.like * self.likes as f64
            + weights.download * self.downloads as f64
            + weights.comment * self.comments as f64
    }

    pub fn score(&self, age_hours: f64, weights: &ScoreWeights) -> f64 {
        let raw = self.raw_score(weights);
        if raw == 0.0 {
            return 0.0;
        }
        raw * decay(age_hours, weights.half_life_hours)
    }
}

fn non_negative(name: &str, value: i64) -> Result<u64, DomainError> {
    u64::try_from(value).map_err(|_| {
        DomainError::invariant(format!("stored {name} counter is negative ({value})"))
    })
}

/// Half-life decay factor in `(0, 1]`. Negative (or NaN) ages count as zero.
pub fn decay(age_hours: f64, half_life_hours: f64) -> f64 {
    0.5_f64.powf(age_hours.max(0.0) / half_life_hours)
}

/// Decayed engagement score.
pub fn score(
    likes: u64,
    downloads: u64,
    comments: u64,
    age_hours: f64,
    weights: &ScoreWeights,
) -> f64 {
    EngagementCounters::new(likes, downloads, comments).score(age_hours, weights)
}

/// Hours elapsed between `created_at` and `now`; negative when `created_at` is in the future.
pub fn age_hours(created_at: OffsetDateTime, now: OffsetDateTime) -> f64 {
    (now - created_at).as_seconds_f64() / SECONDS_PER_HOUR
}
