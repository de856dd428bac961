//! Per-user submission rate limiting
//!
//! Fixed-window counters keyed by user id, held in a Moka cache. A user idle
//! for a full window has nothing left to count, so the entry expires with
//! `time_to_idle` instead of being swept by hand. A rejected check reports
//! how long the caller has to wait before the window rolls over.

use crate::config::types::RateLimitConfig;
use moka::sync::Cache;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Upper bound on tracked users
const MAX_TRACKED_USERS: u64 = 100_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window rate limiter
pub struct RateLimiter {
    window: Duration,
    max_requests: u32,
    windows: Cache<Arc<str>, Arc<Mutex<Window>>>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: u32) -> Self {
        let windows = Cache::builder()
            .max_capacity(MAX_TRACKED_USERS)
            .time_to_idle(window.max(Duration::from_millis(1)))
            .build();
        Self {
            window,
            max_requests,
            windows,
        }
    }

    /// Build from config; `None` when limiting is disabled
    pub fn from_config(config: &RateLimitConfig) -> Option<Self> {
        config.enabled.then(|| {
            Self::new(Duration::from_millis(config.window_ms), config.max_requests)
        })
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Count one request for `user_id`; `Err` carries the time until retry
    pub fn check(&self, user_id: &str) -> Result<(), Duration> {
        self.check_at(user_id, Instant::now())
    }

    fn check_at(&self, user_id: &str, now: Instant) -> Result<(), Duration> {
        if self.max_requests == 0 {
            return Err(self.window);
        }

        let key: Arc<str> = Arc::from(user_id);
        let entry = self.windows.get_with(key, || {
            Arc::new(Mutex::new(Window {
                started: now,
                count: 0,
            }))
        });
        let mut window = entry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let age = now.saturating_duration_since(window.started);
        if age >= self.window {
            *window = Window {
                started: now,
                count: 0,
            };
        } else if window.count >= self.max_requests {
            return Err(self.window - age);
        }
        window.count += 1;
        Ok(())
    }

    /// Number of users with a live window
    pub fn tracked_users(&self) -> u64 {
        self.windows.run_pending_tasks();
        self.windows.entry_count()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("tracked_users", &self.windows.entry_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit_then_rejects() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        let now = Instant::now();
        for _ in 0..3 {
            assert!(limiter.check_at("u1", now).is_ok());
        }
        let wait = limiter
            .check_at("u1", now + Duration::from_secs(10))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(50));
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        let now = Instant::now();
        assert!(limiter.check_at("u1", now).is_ok());
        assert!(limiter.check_at("u1", now).is_err());
        assert!(limiter.check_at("u2", now).is_ok());
        assert_eq!(limiter.tracked_users(), 2);
    }

    #[test]
    fn test_window_rolls_over() {
        let limiter = RateLimiter::new(Duration::from_millis(100), 1);
        let now = Instant::now();
        assert!(limiter.check_at("u1", now).is_ok());
        assert!(limiter.check_at("u1", now + Duration::from_millis(50)).is_err());
        assert!(limiter.check_at("u1", now + Duration::from_millis(100)).is_ok());
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 0);
        assert_eq!(limiter.check("u1"), Err(Duration::from_secs(1)));
        assert_eq!(limiter.tracked_users(), 0);
    }

    #[test]
    fn test_idle_users_expire() {
        let limiter = RateLimiter::new(Duration::from_millis(20), 5);
        for i in 0..50 {
            limiter.check(&format!("user-{}", i)).unwrap();
        }
        assert_eq!(limiter.tracked_users(), 50);

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(limiter.tracked_users(), 0);

        // an expired user starts a fresh window
        for _ in 0..5 {
            assert!(limiter.check("user-0").is_ok());
        }
        assert!(limiter.check("user-0").is_err());
    }

    #[test]
    fn test_from_config() {
        let mut config = RateLimitConfig::default();
        let limiter = RateLimiter::from_config(&config).unwrap();
        assert_eq!(limiter.max_requests(), 30);
        assert_eq!(limiter.window(), Duration::from_secs(60));

        config.enabled = false;
        assert!(RateLimiter::from_config(&config).is_none());
    }
}
