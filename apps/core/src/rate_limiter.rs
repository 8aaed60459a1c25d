use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// A client-side throttle using a sliding window algorithm.
///
/// Timestamps are tracked per key (the prompt task label), so a burst of
/// batch analyses cannot starve the chat path of its own budget.
#[derive(Debug)]
pub struct RateLimiter {
    /// Timestamps of admitted calls for each key, oldest first.
    requests: HashMap<String, VecDeque<Instant>>,
    /// The maximum number of calls admitted within the `window`.
    limit: usize,
    /// The duration of the sliding window.
    window: Duration,
}

impl RateLimiter {
    /// Creates a new `RateLimiter` admitting `limit` calls per `window`.
    pub fn new(limit: usize, window: Duration) -> Self {
        RateLimiter {
            requests: HashMap::new(),
            limit,
            window,
        }
    }

    /// Checks whether a call for `key` is admitted.
    ///
    /// An admitted call is recorded and the function returns `true`.
    /// A refused call is not recorded.
    pub fn check(&mut self, key: &str) -> bool {
        let now = Instant::now();
        let window = self.window;

        let timestamps = self.requests.entry(key.to_string()).or_default();

        while let Some(oldest) = timestamps.front() {
            if now.duration_since(*oldest) >= window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() < self.limit {
            timestamps.push_back(now);
            true
        } else {
            false
        }
    }

    /// Time until the next call for `key` would be admitted. Zero if one would be now.
    pub fn retry_after(&self, key: &str) -> Duration {
        match self.requests.get(key) {
            Some(timestamps) if timestamps.len() >= self.limit => timestamps
                .front()
                .map(|oldest| self.window.saturating_sub(oldest.elapsed()))
                .unwrap_or_default(),
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_rate_limiter_allows_requests_within_limit() {
        let mut limiter = RateLimiter::new(5, Duration::from_secs(1));
        for _ in 0..5 {
            assert!(limiter.check("sentiment"));
        }
        assert!(!limiter.check("sentiment"));
        assert!(limiter.retry_after("sentiment") > Duration::ZERO);
    }

    #[test]
    fn test_rate_limiter_resets_after_window() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(50));
        assert!(limiter.check("chat"));
        assert!(limiter.check("chat"));
        assert!(!limiter.check("chat"));

        thread::sleep(Duration::from_millis(60));

        assert!(limiter.check("chat"));
    }

    #[test]
    fn test_keys_have_separate_budgets() {
        let mut limiter = RateLimiter::new(1, Duration::from_secs(1));
        assert!(limiter.check("sentiment"));
        assert!(!limiter.check("sentiment"));
        assert!(limiter.check("chat"));
        assert_eq!(limiter.retry_after("insights"), Duration::ZERO);
    }
}
