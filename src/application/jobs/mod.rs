//! Cron-driven background work.

mod context;
mod rescore;
mod sweep;

pub use context::job_failed;
pub use rescore::{RescoreContext, RescoreJob, process_rescore_job};
pub use sweep::{CacheSweeper, SweepJob, SweepSummary, process_sweep_job};
