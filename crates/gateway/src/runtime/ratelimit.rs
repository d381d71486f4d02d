//! Per-session sliding-window rate limiting (requests per minute).

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::Mutex;

const WINDOW_MS: u64 = 60_000;

/// In-memory per-session request windows with lazy cleanup.
pub struct SessionRateLimiter {
    max_per_minute: u32,
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
    epoch: Instant,
}

impl SessionRateLimiter {
    pub fn new(max_per_minute: u32) -> Self {
        Self {
            max_per_minute: max_per_minute.max(1),
            windows: Mutex::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Count a request. `Err(retry_after_s)` when the session budget is
    /// spent.
    pub fn check(&self, session_id: &str) -> Result<(), u64> {
        self.check_at(session_id, self.now_ms())
    }

    /// Clock-injected core (testable without sleeping).
    pub fn check_at(&self, session_id: &str, now_ms: u64) -> Result<(), u64> {
        let mut windows = self.windows.lock();

        // Lazy cleanup when the map grows large.
        if windows.len() > 10_000 {
            windows.retain(|_, w| {
                w.back()
                    .is_some_and(|&last| now_ms.saturating_sub(last) < WINDOW_MS)
            });
        }

        let window = windows.entry(session_id.to_owned()).or_default();
        while let Some(&front) = window.front() {
            if now_ms.saturating_sub(front) >= WINDOW_MS {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() as u32 >= self.max_per_minute {
            let retry_after_s = window
                .front()
                .map(|&oldest| {
                    WINDOW_MS
                        .saturating_sub(now_ms.saturating_sub(oldest))
                        .div_ceil(1_000)
                })
                .unwrap_or(60)
                .max(1);
            return Err(retry_after_s);
        }
        window.push_back(now_ms);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_budget() {
        let limiter = SessionRateLimiter::new(3);
        for i in 0..3 {
            assert!(limiter.check_at("s1", i * 1_000).is_ok());
        }
        let retry = limiter.check_at("s1", 3_000).unwrap_err();
        assert!(retry >= 1);
    }

    #[test]
    fn window_slides_with_time() {
        let limiter = SessionRateLimiter::new(2);
        assert!(limiter.check_at("s1", 0).is_ok());
        assert!(limiter.check_at("s1", 1_000).is_ok());
        assert!(limiter.check_at("s1", 2_000).is_err());
        // First request aged out.
        assert!(limiter.check_at("s1", 60_500).is_ok());
    }

    #[test]
    fn sessions_are_independent() {
        let limiter = SessionRateLimiter::new(1);
        assert!(limiter.check_at("s1", 0).is_ok());
        assert!(limiter.check_at("s2", 0).is_ok());
        assert!(limiter.check_at("s1", 1).is_err());
    }
}
