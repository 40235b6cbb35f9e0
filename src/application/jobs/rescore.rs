//! Hourly job persisting decayed feed scores and pruning expired items.

use std::sync::Arc;

use apalis::prelude::*;

use crate::application::feed::FeedService;

use super::context::job_failed;

/// Marker for the cron-triggered rescore.
/// Must implement `From<chrono::DateTime<chrono::Utc>>` for apalis-cron compatibility.
#[derive(Default, Debug, Clone)]
pub struct RescoreJob;

impl From<chrono::DateTime<chrono::Utc>> for RescoreJob {
    fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
        Self
    }
}

#[derive(Clone)]
pub struct RescoreContext {
    pub feed: Arc<FeedService>,
}

pub async fn process_rescore_job(
    _job: RescoreJob,
    ctx: Data<RescoreContext>,
) -> Result<(), apalis::prelude::Error> {
    match ctx.feed.rescore().await {
        Ok(summary) => {
            tracing::debug!(
                rescored = summary.rescored,
                pruned = summary.pruned,
                "Rescore job finished"
            );
            Ok(())
        }
        Err(err) => {
            tracing::warn!(error = %err, "Rescore job failed");
            Err(job_failed(err))
        }
    }
}
