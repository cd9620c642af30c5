//! In-memory per-identity rate limiting for matchmaking actions.
//!
//! Mirrors this stack's own rate limiter for connection-establishing
//! actions: a last-action-instant per key, checked and stamped under a
//! single lock, periodically swept so a quiet identity's entry doesn't sit
//! around forever. Unlike that limiter's HTTP-facing sibling, there is no
//! external store here — `find_partner`/`skip` only ever matter within this
//! process's own registry, and this service keeps no persistent state.
//!
//! Built on `tokio::time::Instant` rather than `std::time::Instant` so it
//! advances (and can be driven deterministically in tests) with the same
//! clock as every timer this stack schedules.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::core::state::UserId;

/// Throttles repeated matchmaking actions from the same identity. A
/// throttled call is not an error: the caller treats it exactly like the
/// idempotent no-op case and never replies with a failure or closes the
/// socket.
pub struct ActionRateLimiter {
    last_action: Mutex<HashMap<UserId, Instant>>,
    min_interval: Duration,
}

impl ActionRateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_action: Mutex::new(HashMap::new()),
            min_interval,
        }
    }

    /// Returns `true` if `user_id` may act now, stamping this instant as
    /// its new last action. Returns `false` if the minimum interval hasn't
    /// elapsed since the previous allowed action.
    pub fn check(&self, user_id: UserId) -> bool {
        let now = Instant::now();
        let mut map = self.last_action.lock().expect("rate limiter mutex poisoned");
        if let Some(last) = map.get(&user_id) {
            if now.duration_since(*last) < self.min_interval {
                return false;
            }
        }
        map.insert(user_id, now);
        true
    }

    /// Drops entries older than 10x the throttle window. Called
    /// periodically so a long-lived server doesn't accumulate one entry
    /// per identity that has ever connected.
    pub fn sweep(&self) {
        let threshold = self.min_interval * 10;
        let mut map = self.last_action.lock().expect("rate limiter mutex poisoned");
        map.retain(|_, last| last.elapsed() < threshold);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_first_action() {
        let limiter = ActionRateLimiter::new(Duration::from_millis(100));
        assert!(limiter.check(UserId::new_v4()));
    }

    #[tokio::test]
    async fn blocks_rapid_repeat() {
        let limiter = ActionRateLimiter::new(Duration::from_millis(200));
        let user = UserId::new_v4();
        assert!(limiter.check(user));
        assert!(!limiter.check(user));
    }

    #[tokio::test(start_paused = true)]
    async fn allows_after_interval_elapses() {
        let limiter = ActionRateLimiter::new(Duration::from_millis(20));
        let user = UserId::new_v4();
        assert!(limiter.check(user));
        tokio::time::advance(Duration::from_millis(30)).await;
        assert!(limiter.check(user));
    }

    #[tokio::test]
    async fn independent_users_do_not_interfere() {
        let limiter = ActionRateLimiter::new(Duration::from_millis(200));
        assert!(limiter.check(UserId::new_v4()));
        assert!(limiter.check(UserId::new_v4()));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_stale_entries() {
        let limiter = ActionRateLimiter::new(Duration::from_millis(1));
        let user = UserId::new_v4();
        limiter.check(user);
        tokio::time::advance(Duration::from_millis(15)).await;
        limiter.sweep();
        assert_eq!(limiter.last_action.lock().unwrap().len(), 0);
    }
}
