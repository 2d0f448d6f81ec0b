use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter per client identifier. Each relay instance
/// tracks its own counts; there is no cross-instance coordination.
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    buckets: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            buckets: DashMap::new(),
        }
    }

    /// Count one request; false once the window budget is spent.
    pub fn allow(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(client.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(bucket.started) >= self.window {
            bucket.started = now;
            bucket.count = 0;
        }
        bucket.count += 1;

        if bucket.count > self.max_requests {
            debug!(%client, count = bucket.count, "rate limit exceeded");
            return false;
        }
        true
    }

    /// Periodically drop buckets whose window has lapsed.
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let limiter = Arc::clone(self);
        let period = limiter.window * 2;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                limiter
                    .buckets
                    .retain(|_, bucket| now.duration_since(bucket.started) < limiter.window);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_deadline::timeout(10)]
    fn enforces_window_budget() {
        let limiter = RateLimiter::new(30, Duration::from_secs(60));
        for i in 1..=30 {
            assert!(limiter.allow("10.0.0.1"), "request {i} should pass");
        }
        assert!(!limiter.allow("10.0.0.1"), "31st request must be rejected");
    }

    #[test_deadline::timeout(10)]
    fn clients_are_counted_independently() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }

    #[test_deadline::timeout(10)]
    fn budget_resets_after_window() {
        let limiter = RateLimiter::new(1, Duration::from_millis(10));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.allow("a"));
    }
}
