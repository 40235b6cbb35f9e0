//! Generic in-memory cache with per-entry expiry.
//!
//! Expired entries are evicted lazily when a read touches them, or in bulk
//! by [`TtlCache::sweep_expired`] from the background sweep job. Capacity is
//! explicit: when full, the least recently used entry is dropped.

use std::borrow::Borrow;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use metrics::counter;
use time::{Duration, OffsetDateTime};

use super::clock::SharedClock;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::ttl";
const METRIC_HIT: &str = "crunevo_cache_hit_total";
const METRIC_MISS: &str = "crunevo_cache_miss_total";
const METRIC_EXPIRED: &str = "crunevo_cache_expired_total";
const METRIC_EVICT: &str = "crunevo_cache_evict_total";

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    expires_at: OffsetDateTime,
}

impl<V> Entry<V> {
    fn is_live(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

pub struct TtlCache<K, V> {
    name: &'static str,
    entries: Mutex<LruCache<K, Entry<V>>>,
    clock: SharedClock,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// `name` labels the cache in metrics and logs.
    pub fn new(name: &'static str, capacity: NonZeroUsize, clock: SharedClock) -> Self {
        Self {
            name,
            entries: Mutex::new(LruCache::new(capacity)),
            clock,
        }
    }

    /// Returns the live value for `key`, evicting it if it has expired.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");

        let found = entries
            .get(key)
            .map(|entry| entry.is_live(now).then(|| entry.value.clone()));
        let live = match found {
            Some(Some(value)) => Some(value),
            Some(None) => {
                entries.pop(key);
                counter!(METRIC_EXPIRED, "cache" => self.name).increment(1);
                None
            }
            None => None,
        };

        match live {
            Some(value) => {
                counter!(METRIC_HIT, "cache" => self.name).increment(1);
                Some(value)
            }
            None => {
                counter!(METRIC_MISS, "cache" => self.name).increment(1);
                None
            }
        }
    }

    /// Expiry of the live entry for `key`, without refreshing its recency.
    pub fn expires_at<Q>(&self, key: &Q) -> Option<OffsetDateTime>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let now = self.clock.now();
        let entries = mutex_lock(&self.entries, SOURCE, "expires_at");
        entries
            .peek(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.expires_at)
    }

    /// Stores `value` for `ttl`. A zero or negative TTL drops any existing entry.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        let evicted = self.with_entries(|entries| entries.insert(key, value, ttl));
        if evicted.is_some() {
            counter!(METRIC_EVICT, "cache" => self.name).increment(1);
        }
    }

    /// Removes every key in one critical section; readers never observe a partial removal.
    pub fn remove_many<'k, I>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = &'k K>,
        K: 'k,
    {
        let mut entries = mutex_lock(&self.entries, SOURCE, "remove_many");
        keys.into_iter()
            .filter(|key| entries.pop(*key).is_some())
            .count()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let expired = self.with_entries(|entries| entries.sweep());
        if !expired.is_empty() {
            counter!(METRIC_EXPIRED, "cache" => self.name).increment(expired.len() as u64);
        }
        expired.len()
    }

    /// Number of entries that have not expired yet. Does not touch recency.
    pub fn live_len(&self) -> usize {
        let now = self.clock.now();
        mutex_lock(&self.entries, SOURCE, "live_len")
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .count()
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn with_entries<R>(&self, f: impl FnOnce(&mut TtlEntries<'_, K, V>) -> R) -> R {
        let now = self.clock.now();
        let mut guard = mutex_lock(&self.entries, SOURCE, "with_entries");
        let mut view = TtlEntries {
            entries: &mut *guard,
            now,
        };
        f(&mut view)
    }
}

/// Locked view used by callers that must combine several operations atomically.
pub(crate) struct TtlEntries<'a, K: Hash + Eq, V> {
    entries: &'a mut LruCache<K, Entry<V>>,
    now: OffsetDateTime,
}

impl<K, V> TtlEntries<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Returns the key pushed out to make room, if any.
    pub(crate) fn insert(&mut self, key: K, value: V, ttl: Duration) -> Option<K> {
        if !ttl.is_positive() {
            self.entries.pop(&key);
            return None;
        }
        let entry = Entry {
            value,
            expires_at: self.now + ttl,
        };
        match self.entries.push(key.clone(), entry) {
            Some((old_key, _)) if old_key != key => Some(old_key),
            _ => None,
        }
    }

    pub(crate) fn remove(&mut self, key: &K) -> bool {
        self.entries.pop(key).is_some()
    }

    pub(crate) fn sweep(&mut self) -> Vec<K> {
        let now = self.now;
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::cache::clock::ManualClock;

    fn cache(capacity: usize) -> (TtlCache<String, u32>, ManualClock) {
        let clock = ManualClock::new(datetime!(2024-03-01 12:00 UTC));
        let cache = TtlCache::new(
            "test",
            NonZeroUsize::new(capacity).expect("non-zero"),
            Arc::new(clock.clone()),
        );
        (cache, clock)
    }

    #[test]
    fn set_then_get_returns_value() {
        let (cache, _) = cache(8);
        cache.set("k".to_string(), 1, Duration::seconds(10));
        assert_eq!(cache.get("k"), Some(1));
        assert_eq!(cache.get("k"), Some(1));
    }

    #[test]
    fn non_positive_ttl_is_an_immediate_miss() {
        let (cache, _) = cache(8);
        cache.set("zero".to_string(), 1, Duration::ZERO);
        cache.set("negative".to_string(), 2, Duration::seconds(-5));
        assert_eq!(cache.get("zero"), None);
        assert_eq!(cache.get("negative"), None);
    }

    #[test]
    fn zero_ttl_drops_previous_value() {
        let (cache, _) = cache(8);
        cache.set("k".to_string(), 1, Duration::minutes(1));
        cache.set("k".to_string(), 2, Duration::ZERO);
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn read_after_expiry_misses_and_evicts() {
        let (cache, clock) = cache(8);
        cache.set("k".to_string(), 1, Duration::seconds(30));
        clock.advance(Duration::seconds(30));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn overwrite_refreshes_expiry() {
        let (cache, clock) = cache(8);
        cache.set("k".to_string(), 1, Duration::seconds(10));
        clock.advance(Duration::seconds(8));
        cache.set("k".to_string(), 2, Duration::seconds(10));
        clock.advance(Duration::seconds(8));
        assert_eq!(cache.get("k"), Some(2));
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let (cache, _) = cache(2);
        cache.set("a".to_string(), 1, Duration::minutes(1));
        cache.set("b".to_string(), 2, Duration::minutes(1));
        assert_eq!(cache.get("a"), Some(1));
        cache.set("c".to_string(), 3, Duration::minutes(1));

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let (cache, clock) = cache(8);
        cache.set("short".to_string(), 1, Duration::seconds(5));
        cache.set("long".to_string(), 2, Duration::minutes(5));
        clock.advance(Duration::seconds(6));

        assert_eq!(cache.live_len(), 1);
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("long"), Some(2));
    }

    #[test]
    fn remove_many_counts_present_keys() {
        let (cache, _) = cache(8);
        cache.set("a".to_string(), 1, Duration::minutes(1));
        cache.set("b".to_string(), 2, Duration::minutes(1));
        let keys = ["a".to_string(), "missing".to_string(), "b".to_string()];
        assert_eq!(cache.remove_many(keys.iter()), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn expires_at_ignores_stale_entries() {
        let (cache, clock) = cache(8);
        cache.set("k".to_string(), 1, Duration::seconds(10));
        assert_eq!(
            cache.expires_at("k"),
            Some(datetime!(2024-03-01 12:00:10 UTC))
        );
        clock.advance(Duration::seconds(11));
        assert_eq!(cache.expires_at("k"), None);
    }
}
