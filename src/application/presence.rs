//! "Who is online" tracking: a user counts as active until their last
//! activity is older than the presence TTL.

use std::sync::Arc;

use time::Duration;

use crate::cache::TtlCache;

#[derive(Clone)]
pub struct PresenceTracker {
    seen: Arc<TtlCache<i64, ()>>,
    ttl: Duration,
}

impl PresenceTracker {
    pub fn new(seen: Arc<TtlCache<i64, ()>>, ttl: Duration) -> Self {
        Self { seen, ttl }
    }

    /// Marks the user active now, extending their presence.
    pub fn touch(&self, user_id: i64) {
        self.seen.set(user_id, (), self.ttl);
    }

    pub fn is_active(&self, user_id: i64) -> bool {
        self.seen.get(&user_id).is_some()
    }

    pub fn active_count(&self) -> usize {
        self.seen.live_len()
    }

    pub fn sweep(&self) -> usize {
        self.seen.sweep_expired()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use time::macros::datetime;

    use super::*;
    use crate::cache::ManualClock;

    #[test]
    fn presence_lapses_after_ttl() {
        let clock = ManualClock::new(datetime!(2024-10-02 08:00 UTC));
        let seen = Arc::new(TtlCache::new(
            "presence",
            NonZeroUsize::new(100).expect("non-zero"),
            Arc::new(clock.clone()),
        ));
        let presence = PresenceTracker::new(seen, Duration::seconds(300));

        presence.touch(1);
        clock.advance(Duration::seconds(200));
        presence.touch(2);
        assert_eq!(presence.active_count(), 2);

        clock.advance(Duration::seconds(150));
        assert!(!presence.is_active(1));
        assert!(presence.is_active(2));
        assert_eq!(presence.active_count(), 1);

        presence.touch(2);
        clock.advance(Duration::seconds(299));
        assert!(presence.is_active(2));
    }
}
