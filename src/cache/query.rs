//! Cached reads with tagged invalidation.
//!
//! Callers opt in explicitly: build a [`QuerySpec`] (name, TTL, tags), derive
//! the [`QueryKey`] from the call arguments, and hand the computation to
//! [`QueryCache::cached`]. Results are stored as JSON so any serializable
//! row set can share one cache, and the row count fed to the profiler comes
//! from the stored shape.
//!
//! Lock order is tag index first, entry store second, in-flight registry
//! last. Readers only touch the entry store, and an invalidation removes all
//! of its keys inside one critical section of that store, so no reader sees
//! half an invalidation.
//!
//! A computation records the epoch it started at. If one of its tags is
//! invalidated while it runs, its result is returned but not stored, so a
//! read racing a committed write cannot re-cache pre-write rows.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use time::Duration;
use tracing::{debug, warn};

use super::clock::SharedClock;
use super::config::CacheConfig;
use super::keys::{KeyBuilder, QueryKey, Tag, TagSet};
use super::lock::{mutex_lock, rw_read, rw_write};
use super::profiler::QueryProfiler;
use super::registry::{Epoch, TagIndex};
use super::ttl::TtlCache;

const SOURCE: &str = "cache::query";
const METRIC_INVALIDATED: &str = "crunevo_cache_invalidated_total";
const METRIC_STALE_SKIPPED: &str = "crunevo_cache_stale_store_skipped_total";

/// Describes one cacheable query: its identity, lifetime and invalidation tags.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    name: &'static str,
    ttl: Option<Duration>,
    tags: TagSet,
}

impl QuerySpec {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            ttl: None,
            tags: TagSet::new(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    /// Starts a key for a call of this query.
    pub fn key(&self) -> KeyBuilder {
        QueryKey::builder(self.name)
    }
}

pub struct QueryCache {
    entries: TtlCache<QueryKey, Arc<Value>>,
    index: RwLock<TagIndex>,
    profiler: Arc<QueryProfiler>,
    default_ttl: Duration,
    epoch: AtomicU64,
    in_flight: Mutex<BTreeMap<Epoch, usize>>,
}

/// Keeps invalidation marks alive while the computation it belongs to runs.
struct ComputeTicket<'a> {
    in_flight: &'a Mutex<BTreeMap<Epoch, usize>>,
    epoch: Epoch,
}

impl Drop for ComputeTicket<'_> {
    fn drop(&mut self) {
        let mut in_flight = mutex_lock(self.in_flight, SOURCE, "end_compute");
        if let Some(count) = in_flight.get_mut(&self.epoch) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&self.epoch);
            }
        }
    }
}

impl QueryCache {
    pub fn new(config: &CacheConfig, clock: SharedClock) -> Self {
        let profiler = Arc::new(QueryProfiler::new(config.profiler_config(), clock.clone()));
        Self {
            entries: TtlCache::new("query", config.query_capacity_non_zero(), clock),
            index: RwLock::new(TagIndex::new()),
            profiler,
            default_ttl: config.query_ttl,
            epoch: AtomicU64::new(0),
            in_flight: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn profiler(&self) -> &Arc<QueryProfiler> {
        &self.profiler
    }

    /// Returns the cached result for `key` or runs `compute`, stores its
    /// result under the query's tags and returns it.
    ///
    /// Errors from `compute` are returned unchanged and nothing is cached.
    pub async fn cached<T, E, F, Fut>(&self, spec: &QuerySpec, key: QueryKey, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        if let Some(stored) = self.entries.get(&key) {
            match T::deserialize(stored.as_ref()) {
                Ok(value) => {
                    self.profiler.record_hit(
                        spec.name,
                        key.short_hash(),
                        started.elapsed(),
                        row_count(&stored),
                    );
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        query = spec.name,
                        key = %key,
                        error = %err,
                        "Cached query result no longer decodes; recomputing"
                    );
                    self.invalidate_key(&key);
                }
            }
        }

        let ticket = self.begin_compute();
        let started = Instant::now();
        let value = compute().await?;
        let elapsed = started.elapsed();

        let rows = match serde_json::to_value(&value) {
            Ok(encoded) => {
                let rows = row_count(&encoded);
                if !self.store_encoded(spec, key.clone(), encoded, ticket.epoch) {
                    counter!(METRIC_STALE_SKIPPED).increment(1);
                    debug!(
                        query = spec.name,
                        key = %key,
                        "Tags invalidated while computing; result not cached"
                    );
                }
                rows
            }
            Err(err) => {
                warn!(
                    query = spec.name,
                    key = %key,
                    error = %err,
                    "Query result is not serializable; returning it uncached"
                );
                0
            }
        };
        self.profiler
            .record_miss(spec.name, key.short_hash(), elapsed, rows);
        drop(ticket);

        Ok(value)
    }

    fn begin_compute(&self) -> ComputeTicket<'_> {
        let mut in_flight = mutex_lock(&self.in_flight, SOURCE, "begin_compute");
        let epoch = self.epoch.load(Ordering::SeqCst);
        *in_flight.entry(epoch).or_default() += 1;
        ComputeTicket {
            in_flight: &self.in_flight,
            epoch,
        }
    }

    fn oldest_in_flight(&self) -> Option<Epoch> {
        mutex_lock(&self.in_flight, SOURCE, "oldest_in_flight")
            .keys()
            .next()
            .copied()
    }

    /// Returns `false` without storing when a tag of `spec` was invalidated after `started_at`.
    fn store_encoded(&self, spec: &QuerySpec, key: QueryKey, encoded: Value, started_at: Epoch) -> bool {
        let ttl = spec.ttl.unwrap_or(self.default_ttl);
        let mut index = rw_write(&self.index, SOURCE, "store");
        if index.invalidated_since(&spec.tags, started_at) {
            return false;
        }
        let evicted = self
            .entries
            .with_entries(|entries| entries.insert(key.clone(), Arc::new(encoded), ttl));
        if let Some(evicted) = evicted {
            index.forget(&evicted);
        }
        if ttl.is_positive() {
            index.register(key, spec.tags.clone());
        } else {
            index.forget(&key);
        }
        true
    }

    /// Deletes every entry carrying any of `tags`, then the tags' own bookkeeping.
    ///
    /// Returns how many live entries were removed.
    pub fn invalidate_tags<'t, I>(&self, tags: I) -> usize
    where
        I: IntoIterator<Item = &'t Tag>,
    {
        let mut index = rw_write(&self.index, SOURCE, "invalidate_tags");
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let mut keys: HashSet<QueryKey> = HashSet::new();
        let mut names: Vec<&str> = Vec::new();
        for tag in tags {
            keys.extend(index.take_tag(tag));
            index.mark_invalidated(tag, epoch);
            names.push(tag.as_str());
        }
        let removed = self.entries.remove_many(keys.iter());
        index.prune_marks(self.oldest_in_flight());
        drop(index);

        counter!(METRIC_INVALIDATED).increment(removed as u64);
        debug!(tags = ?names, indexed = keys.len(), removed, "Invalidated cache tags");
        removed
    }

    pub fn invalidate_key(&self, key: &QueryKey) -> bool {
        let mut index = rw_write(&self.index, SOURCE, "invalidate_key");
        index.forget(key);
        self.entries.with_entries(|entries| entries.remove(key))
    }

    /// Drops expired results together with their tag bookkeeping.
    pub fn sweep_expired(&self) -> usize {
        let mut index = rw_write(&self.index, SOURCE, "sweep_expired");
        let expired = self.entries.with_entries(|entries| entries.sweep());
        for key in &expired {
            index.forget(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tag_count(&self) -> usize {
        rw_read(&self.index, SOURCE, "tag_count").tag_count()
    }
}

fn row_count(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::Array(rows) => rows.len(),
        _ => 1,
    }
}
