//! Per-host sliding-window rate limiter.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const DEFAULT_LIMIT: usize = 100;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Bounds request bursts per destination host. One lock per limiter; the
/// critical section is a deque prune and push.
#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hosts: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_LIMIT, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    #[must_use]
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Record one request against `host`; false means over the limit.
    pub fn try_acquire(&self, host: &str) -> bool {
        self.try_acquire_at(host, Instant::now())
    }

    fn try_acquire_at(&self, host: &str, now: Instant) -> bool {
        let mut hosts = self.hosts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let window = hosts.entry(host.to_owned()).or_default();
        while window
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            window.pop_front();
        }
        if window.len() >= self.limit {
            return false;
        }
        window.push_back(now);
        true
    }

    /// Drop all recorded windows.
    pub fn reset(&self) {
        self.hosts
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}
