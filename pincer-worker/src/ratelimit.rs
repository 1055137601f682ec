//! Best-effort per-action throttling.
//!
//! Counters are keyed by `(keyId, adapter, action)` plus the current minute
//! bucket and live only in this process; across isolates the limit is
//! advisory. Buckets more than two minutes stale are evicted on the way
//! through so the map stays bounded.

use std::collections::HashMap;
use std::sync::Mutex;

const BUCKET_MS: i64 = 60_000;
const STALE_BUCKETS: i64 = 2;

#[derive(Default)]
pub struct RateLimiter {
    counters: Mutex<HashMap<String, Counter>>,
}

struct Counter {
    bucket: i64,
    count: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether this call is within `limit` for the current minute
    /// bucket, incrementing the counter when it is.
    pub fn check(
        &self,
        key_id: &str,
        adapter: &str,
        action: &str,
        limit: u64,
        now_ms: i64,
    ) -> bool {
        let bucket = now_ms.div_euclid(BUCKET_MS);
        let mut counters = self.counters.lock().expect("rate limiter mutex");
        counters.retain(|_, counter| counter.bucket + STALE_BUCKETS >= bucket);

        let counter = counters
            .entry(format!("{key_id}:{adapter}:{action}"))
            .or_insert(Counter { bucket, count: 0 });
        if counter.bucket != bucket {
            counter.bucket = bucket;
            counter.count = 0;
        }
        if counter.count >= limit {
            return false;
        }
        counter.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_750_000_000_000;

    #[test]
    fn allows_exactly_the_limit_within_one_bucket() {
        let limiter = RateLimiter::new();
        for _ in 0..90 {
            assert!(limiter.check("rk", "youtube", "list", 90, NOW));
        }
        assert!(!limiter.check("rk", "youtube", "list", 90, NOW));
    }

    #[test]
    fn new_minute_bucket_resets_the_counter() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("rk", "a", "act", 1, NOW));
        assert!(!limiter.check("rk", "a", "act", 1, NOW));
        assert!(limiter.check("rk", "a", "act", 1, NOW + BUCKET_MS));
    }

    #[test]
    fn counters_are_scoped_per_key_adapter_action() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("rk1", "a", "act", 1, NOW));
        assert!(limiter.check("rk2", "a", "act", 1, NOW));
        assert!(limiter.check("rk1", "b", "act", 1, NOW));
        assert!(limiter.check("rk1", "a", "other", 1, NOW));
        assert!(!limiter.check("rk1", "a", "act", 1, NOW));
    }

    #[test]
    fn stale_buckets_are_evicted() {
        let limiter = RateLimiter::new();
        limiter.check("rk", "a", "act", 10, NOW);
        limiter.check("rk", "b", "act", 10, NOW);
        // Three minutes later both old counters are dropped.
        limiter.check("rk", "c", "act", 10, NOW + 3 * BUCKET_MS);
        let counters = limiter.counters.lock().unwrap();
        assert_eq!(counters.len(), 1);
        assert!(counters.contains_key("rk:c:act"));
    }
}
