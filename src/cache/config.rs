//! Cache configuration.
//!
//! Capacities and TTLs for every in-process cache, resolved from the
//! `[cache]`, `[profiler]`, `[link_preview]`, `[weather]` and `[presence]`
//! sections of `crunevo.toml`.

use std::num::NonZeroUsize;
use std::time::Duration as StdDuration;

use time::Duration;

use super::profiler::ProfilerConfig;

const DEFAULT_QUERY_CAPACITY: usize = 2_000;
const DEFAULT_QUERY_TTL_SECS: i64 = 300;
const DEFAULT_PREVIEW_CAPACITY: usize = 1_000;
const DEFAULT_PREVIEW_TTL_SECS: i64 = 6 * 60 * 60;
const DEFAULT_WEATHER_CAPACITY: usize = 500;
const DEFAULT_WEATHER_TTL_SECS: i64 = 600;
const DEFAULT_PRESENCE_CAPACITY: usize = 10_000;
const DEFAULT_PRESENCE_TTL_SECS: i64 = 300;
const DEFAULT_SAMPLE_WINDOW: usize = 1_000;
const DEFAULT_SLOW_QUERY_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum cached query results.
    pub query_capacity: usize,
    /// TTL for query results whose spec does not set one.
    pub query_ttl: Duration,
    pub preview_capacity: usize,
    pub preview_ttl: Duration,
    pub weather_capacity: usize,
    pub weather_ttl: Duration,
    pub presence_capacity: usize,
    pub presence_ttl: Duration,
    /// Samples kept by the query profiler.
    pub profiler_sample_window: usize,
    /// Execution time above which a query counts as slow.
    pub slow_query_threshold: StdDuration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_capacity: DEFAULT_QUERY_CAPACITY,
            query_ttl: Duration::seconds(DEFAULT_QUERY_TTL_SECS),
            preview_capacity: DEFAULT_PREVIEW_CAPACITY,
            preview_ttl: Duration::seconds(DEFAULT_PREVIEW_TTL_SECS),
            weather_capacity: DEFAULT_WEATHER_CAPACITY,
            weather_ttl: Duration::seconds(DEFAULT_WEATHER_TTL_SECS),
            presence_capacity: DEFAULT_PRESENCE_CAPACITY,
            presence_ttl: Duration::seconds(DEFAULT_PRESENCE_TTL_SECS),
            profiler_sample_window: DEFAULT_SAMPLE_WINDOW,
            slow_query_threshold: StdDuration::from_millis(DEFAULT_SLOW_QUERY_MS),
        }
    }
}

impl From<&crate::config::Settings> for CacheConfig {
    fn from(settings: &crate::config::Settings) -> Self {
        Self {
            query_capacity: settings.cache.query_capacity.get(),
            query_ttl: settings.cache.query_ttl,
            preview_capacity: settings.cache.preview_capacity.get(),
            preview_ttl: settings.link_preview.ttl,
            weather_capacity: settings.cache.weather_capacity.get(),
            weather_ttl: settings.weather.ttl,
            presence_capacity: settings.cache.presence_capacity.get(),
            presence_ttl: settings.presence.ttl,
            profiler_sample_window: settings.profiler.sample_window.get(),
            slow_query_threshold: settings.profiler.slow_query_threshold,
        }
    }
}

impl CacheConfig {
    pub fn query_capacity_non_zero(&self) -> NonZeroUsize {
        non_zero(self.query_capacity)
    }

    pub fn preview_capacity_non_zero(&self) -> NonZeroUsize {
        non_zero(self.preview_capacity)
    }

    pub fn weather_capacity_non_zero(&self) -> NonZeroUsize {
        non_zero(self.weather_capacity)
    }

    pub fn presence_capacity_non_zero(&self) -> NonZeroUsize {
        non_zero(self.presence_capacity)
    }

    pub fn profiler_config(&self) -> ProfilerConfig {
        ProfilerConfig {
            sample_window: non_zero(self.profiler_sample_window),
            slow_threshold: self.slow_query_threshold,
            ..ProfilerConfig::default()
        }
    }
}

/// Clamps zero to one so a misconfigured capacity still yields a working cache.
fn non_zero(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.query_capacity, 2_000);
        assert_eq!(config.preview_ttl, Duration::hours(6));
        assert_eq!(config.weather_ttl, Duration::minutes(10));
        assert_eq!(config.profiler_sample_window, 1_000);
        assert_eq!(config.slow_query_threshold, StdDuration::from_millis(100));
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            query_capacity: 0,
            ..Default::default()
        };
        assert_eq!(config.query_capacity_non_zero().get(), 1);
    }

    #[test]
    fn profiler_config_carries_threshold() {
        let config = CacheConfig {
            profiler_sample_window: 50,
            slow_query_threshold: StdDuration::from_millis(250),
            ..Default::default()
        };
        let profiler = config.profiler_config();
        assert_eq!(profiler.sample_window.get(), 50);
        assert_eq!(profiler.slow_threshold, StdDuration::from_millis(250));
        assert_eq!(profiler.report_window, Duration::HOUR);
    }
}
