use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing::level_filters::LevelFilter;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Dependencies (sqlx, apalis, reqwest, hyper) log at this level unless `RUST_LOG` says otherwise.
const DEPENDENCY_LEVEL: LevelFilter = LevelFilter::WARN;

/// Install a global tracing subscriber using the provided logging settings.
///
/// The configured level applies to this crate's targets. `RUST_LOG`, when
/// set and valid, replaces the whole filter.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(logging.level)))
        .map_err(|err| InfraError::telemetry(format!("invalid log filter: {err}")))?;

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Dependencies never log more verbosely than the crate itself.
fn default_directives(level: LevelFilter) -> String {
    let dependencies = level.min(DEPENDENCY_LEVEL);
    format!("{dependencies},crunevo={level}")
}

/// Register descriptions for every metric the crate emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "crunevo_cache_hit_total",
            Unit::Count,
            "Total number of TTL cache hits, labelled by cache."
        );
        describe_counter!(
            "crunevo_cache_miss_total",
            Unit::Count,
            "Total number of TTL cache misses, labelled by cache."
        );
        describe_counter!(
            "crunevo_cache_expired_total",
            Unit::Count,
            "Total number of entries dropped because their TTL elapsed."
        );
        describe_counter!(
            "crunevo_cache_evict_total",
            Unit::Count,
            "Total number of TTL cache evictions due to capacity."
        );
        describe_counter!(
            "crunevo_cache_invalidated_total",
            Unit::Count,
            "Total number of query results removed by tag invalidation."
        );
        describe_counter!(
            "crunevo_cache_stale_store_skipped_total",
            Unit::Count,
            "Total number of query results not cached because their tags were invalidated mid-computation."
        );
        describe_counter!(
            "crunevo_cache_poisoned_lock_total",
            Unit::Count,
            "Total number of poisoned cache locks recovered."
        );
        describe_histogram!(
            "crunevo_query_duration_ms",
            Unit::Milliseconds,
            "Query execution time in milliseconds, cache hits included."
        );
        describe_counter!(
            "crunevo_query_slow_total",
            Unit::Count,
            "Total number of queries slower than the configured threshold."
        );
        describe_counter!(
            "crunevo_login_failures_total",
            Unit::Count,
            "Total number of failed logins recorded."
        );
        describe_counter!(
            "crunevo_login_blocked_total",
            Unit::Count,
            "Total number of usernames that crossed the failed-login limit."
        );
        describe_counter!(
            "crunevo_search_fallback_total",
            Unit::Count,
            "Total number of searches served by the substring fallback."
        );
        describe_counter!(
            "crunevo_preview_fetch_total",
            Unit::Count,
            "Total number of link preview fetches, labelled by outcome."
        );
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_is_scoped_to_the_crate() {
        assert_eq!(default_directives(LevelFilter::DEBUG), "warn,crunevo=debug");
        assert_eq!(default_directives(LevelFilter::INFO), "warn,crunevo=info");
    }

    #[test]
    fn quiet_levels_also_quiet_dependencies() {
        assert_eq!(default_directives(LevelFilter::ERROR), "error,crunevo=error");
        assert_eq!(default_directives(LevelFilter::OFF), "off,crunevo=off");
        assert!(EnvFilter::try_new(default_directives(LevelFilter::TRACE)).is_ok());
    }
}
