//! Fixed-window throttling of failed logins, keyed by username.
//!
//! The first failure opens a window; further failures inside it increment
//! the count without extending it. Once the count reaches the limit the
//! username is blocked until the window closes or [`LoginAttemptLimiter::reset`]
//! is called after a successful login. Advisory only: no call can fail.

use std::sync::Arc;

use dashmap::DashMap;
use metrics::counter;
use time::{Duration, OffsetDateTime};
use tracing::{debug, warn};

use crate::cache::SharedClock;

pub const DEFAULT_BLOCK_LIMIT: u32 = 5;
pub const DEFAULT_BLOCK_WINDOW: Duration = Duration::seconds(900);

const METRIC_FAILURES: &str = "crunevo_login_failures_total";
const METRIC_BLOCKED: &str = "crunevo_login_blocked_total";

#[derive(Debug, Clone, Copy)]
struct Attempts {
    count: u32,
    expires_at: OffsetDateTime,
}

impl Attempts {
    fn is_live(&self, now: OffsetDateTime) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone)]
pub struct LoginAttemptLimiter {
    limit: u32,
    window: Duration,
    attempts: Arc<DashMap<String, Attempts>>,
    clock: SharedClock,
}

impl LoginAttemptLimiter {
    pub fn new(limit: u32, window: Duration, clock: SharedClock) -> Self {
        Self {
            limit: limit.max(1),
            window,
            attempts: Arc::new(DashMap::new()),
            clock,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a failed login and returns the failure count in the current window.
    pub fn record_fail(&self, username: &str) -> u32 {
        let now = self.clock.now();
        let window = self.window;

        let count = {
            let mut entry = self
                .attempts
                .entry(username.to_string())
                .or_insert(Attempts {
                    count: 0,
                    expires_at: now + window,
                });
            if !entry.is_live(now) {
                *entry = Attempts {
                    count: 0,
                    expires_at: now + window,
                };
            }
            entry.count = entry.count.saturating_add(1);
            entry.count
        };

        counter!(METRIC_FAILURES).increment(1);
        if count == self.limit {
            counter!(METRIC_BLOCKED).increment(1);
            warn!(
                username,
                attempts = count,
                window_seconds = window.whole_seconds(),
                "Login temporarily blocked after repeated failures"
            );
        } else {
            debug!(username, attempts = count, "Recorded failed login");
        }
        count
    }

    /// Clears the record, typically after a successful login.
    pub fn reset(&self, username: &str) {
        self.attempts.remove(username);
    }

    pub fn is_blocked(&self, username: &str) -> bool {
        self.get_attempts(username) >= self.limit
    }

    /// Failures in the current window; zero once it has closed.
    pub fn get_attempts(&self, username: &str) -> u32 {
        self.live(username).map_or(0, |attempts| attempts.count)
    }

    /// Whole seconds, rounded up, until the window closes; zero if there is none.
    pub fn get_remaining(&self, username: &str) -> u64 {
        let now = self.clock.now();
        self.live(username).map_or(0, |attempts| {
            let remaining = attempts.expires_at - now;
            let secs = remaining.whole_seconds() + i64::from(remaining.subsec_nanoseconds() > 0);
            u64::try_from(secs).unwrap_or(0)
        })
    }

    /// Drops every closed window and returns how many records were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.attempts.len();
        self.attempts.retain(|_, attempts| attempts.is_live(now));
        before.saturating_sub(self.attempts.len())
    }

    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }

    fn live(&self, username: &str) -> Option<Attempts> {
        let now = self.clock.now();
        let current = self.attempts.get(username).map(|entry| *entry)?;
        if current.is_live(now) {
            return Some(current);
        }
        self.attempts
            .remove_if(username, |_, attempts| !attempts.is_live(now));
        None
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::cache::ManualClock;

    fn limiter() -> (LoginAttemptLimiter, ManualClock) {
        let clock = ManualClock::new(datetime!(2024-09-01 18:00 UTC));
        let limiter =
            LoginAttemptLimiter::new(DEFAULT_BLOCK_LIMIT, DEFAULT_BLOCK_WINDOW, Arc::new(clock.clone()));
        (limiter, clock)
    }

    #[test]
    fn unknown_user_is_not_blocked() {
        let (limiter, _) = limiter();
        assert!(!limiter.is_blocked("nobody"));
        assert_eq!(limiter.get_attempts("nobody"), 0);
        assert_eq!(limiter.get_remaining("nobody"), 0);
    }

    #[test]
    fn fifth_failure_blocks() {
        let (limiter, _) = limiter();
        for expected in 1..=4 {
            assert_eq!(limiter.record_fail("bob"), expected);
            assert!(!limiter.is_blocked("bob"));
        }
        assert_eq!(limiter.record_fail("bob"), 5);
        assert!(limiter.is_blocked("bob"));
        let remaining = limiter.get_remaining("bob");
        assert!(remaining > 0 && remaining <= 900);
    }

    #[test]
    fn reset_unblocks() {
        let (limiter, _) = limiter();
        for _ in 0..5 {
            limiter.record_fail("alice");
        }
        assert!(limiter.is_blocked("alice"));
        limiter.reset("alice");
        assert!(!limiter.is_blocked("alice"));
        assert_eq!(limiter.get_attempts("alice"), 0);
    }

    #[test]
    fn window_is_fixed_from_first_failure() {
        let (limiter, clock) = limiter();
        limiter.record_fail("carol");
        clock.advance(Duration::seconds(600));
        limiter.record_fail("carol");
        assert_eq!(limiter.get_remaining("carol"), 300);

        clock.advance(Duration::seconds(300));
        assert_eq!(limiter.get_attempts("carol"), 0);
        assert_eq!(limiter.tracked(), 0, "expired record is evicted on read");
        assert_eq!(limiter.record_fail("carol"), 1);
    }

    #[test]
    fn remaining_rounds_up_partial_seconds() {
        let (limiter, clock) = limiter();
        limiter.record_fail("dave");
        clock.advance(Duration::milliseconds(1_500));
        assert_eq!(limiter.get_remaining("dave"), 899);
    }

    #[test]
    fn purge_removes_only_closed_windows() {
        let (limiter, clock) = limiter();
        limiter.record_fail("old");
        clock.advance(Duration::seconds(901));
        limiter.record_fail("new");
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.tracked(), 1);
    }
}
