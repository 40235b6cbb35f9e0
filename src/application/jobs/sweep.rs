//! Periodic removal of expired entries from every in-process cache.

use std::sync::Arc;

use apalis::prelude::*;
use serde::Serialize;

use crate::application::link_preview::LinkPreview;
use crate::application::login_attempts::LoginAttemptLimiter;
use crate::application::presence::PresenceTracker;
use crate::application::weather::{CoordinateKey, WeatherReport};
use crate::cache::{QueryCache, TtlCache};

#[derive(Default, Debug, Clone)]
pub struct SweepJob;

impl From<chrono::DateTime<chrono::Utc>> for SweepJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub queries: usize,
    pub previews: usize,
    pub weather: usize,
    pub presence: usize,
    pub login_windows: usize,
}

impl SweepSummary {
    pub fn total(&self) -> usize {
        self.queries + self.previews + self.weather + self.presence + self.login_windows
    }
}

#[derive(Clone)]
pub struct CacheSweeper {
    pub queries: Arc<QueryCache>,
    pub previews: Arc<TtlCache<String, LinkPreview>>,
    pub weather: Arc<TtlCache<CoordinateKey, WeatherReport>>,
    pub presence: PresenceTracker,
    pub login: LoginAttemptLimiter,
}

impl CacheSweeper {
    pub fn sweep(&self) -> SweepSummary {
        SweepSummary {
            queries: self.queries.sweep_expired(),
            previews: self.previews.sweep_expired(),
            weather: self.weather.sweep_expired(),
            presence: self.presence.sweep(),
            login_windows: self.login.purge_expired(),
        }
    }
}

pub async fn process_sweep_job(
    _job: SweepJob,
    sweeper: Data<CacheSweeper>,
) -> Result<(), apalis::prelude::Error> {
    let summary = sweeper.sweep();
    if summary.total() > 0 {
        tracing::info!(
            queries = summary.queries,
            previews = summary.previews,
            weather = summary.weather,
            presence = summary.presence,
            login_windows = summary.login_windows,
            "Swept expired cache entries"
        );
    }

    let report = sweeper.queries.profiler().report();
    tracing::debug!(
        window_queries = report.window_queries,
        average_ms = report.average_ms,
        cache_hit_rate = report.cache_hit_rate,
        slow_queries = report.slow_queries,
        "Query profile"
    );
    Ok(())
}
