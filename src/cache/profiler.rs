//! Rolling query profiler.
//!
//! Keeps the most recent samples in a bounded ring plus lifetime hit/total
//! counters. Every windowed statistic in [`QueryReport`], the hit rate
//! included, is computed from the same set of samples: those still in the
//! ring and younger than the report window. Lifetime figures are reported
//! separately and never mixed into windowed ones.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use metrics::{counter, histogram};
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use super::clock::SharedClock;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::profiler";
const METRIC_QUERY_MS: &str = "crunevo_query_duration_ms";
const METRIC_SLOW_QUERY: &str = "crunevo_query_slow_total";
const TOP_SLOWEST: usize = 5;

#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    pub sample_window: NonZeroUsize,
    pub slow_threshold: StdDuration,
    pub report_window: Duration,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            sample_window: NonZeroUsize::new(1000).unwrap_or(NonZeroUsize::MIN),
            slow_threshold: StdDuration::from_millis(100),
            report_window: Duration::HOUR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuerySample {
    pub query: &'static str,
    pub key_hash: String,
    pub elapsed: StdDuration,
    pub rows: usize,
    pub cache_hit: bool,
    pub recorded_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlowKey {
    pub query: &'static str,
    pub key_hash: String,
    pub average_ms: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    #[serde(with = "time::serde::timestamp")]
    pub generated_at: OffsetDateTime,
    pub window_seconds: i64,
    pub window_queries: usize,
    pub average_ms: f64,
    pub cache_hit_rate: f64,
    pub slow_queries: usize,
    pub slowest_keys: Vec<SlowKey>,
    pub lifetime_queries: u64,
    pub lifetime_hit_rate: f64,
}

pub struct QueryProfiler {
    config: ProfilerConfig,
    samples: Mutex<VecDeque<QuerySample>>,
    lifetime_hits: AtomicU64,
    lifetime_total: AtomicU64,
    clock: SharedClock,
}

impl QueryProfiler {
    pub fn new(config: ProfilerConfig, clock: SharedClock) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(config.sample_window.get())),
            config,
            lifetime_hits: AtomicU64::new(0),
            lifetime_total: AtomicU64::new(0),
            clock,
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn record_hit(&self, query: &'static str, key_hash: &str, elapsed: StdDuration, rows: usize) {
        self.record(query, key_hash, elapsed, rows, true);
    }

    pub fn record_miss(&self, query: &'static str, key_hash: &str, elapsed: StdDuration, rows: usize) {
        self.record(query, key_hash, elapsed, rows, false);
    }

    fn record(
        &self,
        query: &'static str,
        key_hash: &str,
        elapsed: StdDuration,
        rows: usize,
        cache_hit: bool,
    ) {
        self.lifetime_total.fetch_add(1, Ordering::Relaxed);
        if cache_hit {
            self.lifetime_hits.fetch_add(1, Ordering::Relaxed);
        }

        let outcome = if cache_hit { "hit" } else { "miss" };
        histogram!(METRIC_QUERY_MS, "query" => query, "outcome" => outcome)
            .record(elapsed.as_secs_f64() * 1000.0);
        if elapsed > self.config.slow_threshold {
            counter!(METRIC_SLOW_QUERY, "query" => query).increment(1);
            tracing::debug!(
                query,
                key_hash,
                elapsed_ms = elapsed.as_millis() as u64,
                rows,
                "Slow query"
            );
        }

        let sample = QuerySample {
            query,
            key_hash: key_hash.to_string(),
            elapsed,
            rows,
            cache_hit,
            recorded_at: self.clock.now(),
        };

        let mut samples = mutex_lock(&self.samples, SOURCE, "record");
        if samples.len() >= self.config.sample_window.get() {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn sample_count(&self) -> usize {
        mutex_lock(&self.samples, SOURCE, "sample_count").len()
    }

    pub fn report(&self) -> QueryReport {
        let now = self.clock.now();
        let cutoff = now - self.config.report_window;
        let window: Vec<QuerySample> = mutex_lock(&self.samples, SOURCE, "report")
            .iter()
            .filter(|sample| sample.recorded_at > cutoff)
            .cloned()
            .collect();

        let window_queries = window.len();
        let total_ms: f64 = window.iter().map(|s| millis(s.elapsed)).sum();
        let hits = window.iter().filter(|s| s.cache_hit).count();
        let slow_queries = window
            .iter()
            .filter(|s| s.elapsed > self.config.slow_threshold)
            .count();

        let lifetime_total = self.lifetime_total.load(Ordering::Relaxed);
        let lifetime_hits = self.lifetime_hits.load(Ordering::Relaxed);

        QueryReport {
            generated_at: now,
            window_seconds: self.config.report_window.whole_seconds(),
            window_queries,
            average_ms: ratio(total_ms, window_queries as f64),
            cache_hit_rate: ratio(hits as f64, window_queries as f64),
            slow_queries,
            slowest_keys: slowest_keys(&window),
            lifetime_queries: lifetime_total,
            lifetime_hit_rate: ratio(lifetime_hits as f64, lifetime_total as f64),
        }
    }
}

fn slowest_keys(window: &[QuerySample]) -> Vec<SlowKey> {
    let mut by_key: HashMap<&str, (&'static str, f64, usize)> = HashMap::new();
    for sample in window {
        let entry = by_key
            .entry(sample.key_hash.as_str())
            .or_insert((sample.query, 0.0, 0));
        entry.1 += millis(sample.elapsed);
        entry.2 += 1;
    }

    let mut keys: Vec<SlowKey> = by_key
        .into_iter()
        .map(|(key_hash, (query, total_ms, samples))| SlowKey {
            query,
            key_hash: key_hash.to_string(),
            average_ms: total_ms / samples as f64,
            samples,
        })
        .collect();
    keys.sort_by(|a, b| {
        b.average_ms
            .total_cmp(&a.average_ms)
            .then_with(|| a.key_hash.cmp(&b.key_hash))
    });
    keys.truncate(TOP_SLOWEST);
    keys
}

fn millis(duration: StdDuration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}
