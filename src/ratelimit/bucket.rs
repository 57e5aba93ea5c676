//! Token Bucket Module
//!
//! Per-key token bucket limiter with lazy refill.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ratelimit::{IDLE_THRESHOLD, SWEEP_INTERVAL};
use crate::tasks::spawn_sweep_task;

// == Limiter Trait ==
/// Admission control keyed by an arbitrary string.
pub trait Limiter: Send + Sync {
    /// Consumes one token for `key`, returning false when none is available.
    fn allow(&self, key: &str) -> bool;

    /// Advisory time until `key` has a whole token. Never consumes one.
    fn wait(&self, key: &str) -> Duration;
}

// == Bucket ==
/// Token state of a single key.
#[derive(Debug)]
struct Bucket {
    /// Always within `0..=burst`
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
        }
    }

    /// Tokens available at `now` without mutating the bucket.
    fn projected(&self, now: Instant, rate: f64, burst: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        (self.tokens + elapsed * rate).min(burst)
    }
}

// == Token Bucket Limiter ==
/// Token bucket limiter holding one bucket per key.
///
/// The map lock only covers bucket creation and removal; each bucket has
/// its own lock, so keys never contend with one another.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    /// Tokens per second
    rate: f64,
    /// Bucket capacity
    burst: f64,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
    /// Cancels the reclamation task
    shutdown: CancellationToken,
}

impl TokenBucketLimiter {
    // == Constructor ==
    /// Creates a limiter without a reclamation task.
    ///
    /// # Arguments
    /// * `rate` - Refill rate in tokens per second, must be positive
    /// * `burst` - Bucket capacity, must be at least 1
    pub fn new(rate: f64, burst: u32) -> Self {
        Self {
            rate,
            burst: f64::from(burst),
            buckets: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a limiter and starts its idle bucket reclamation on the
    /// current tokio runtime.
    pub fn start(rate: f64, burst: u32) -> Arc<Self> {
        let limiter = Arc::new(Self::new(rate, burst));
        limiter.spawn_reclaimer(SWEEP_INTERVAL, IDLE_THRESHOLD);
        limiter
    }

    /// Spawns a sweep removing buckets idle for longer than `idle`, every
    /// `interval`. The task ends when [`stop`](Self::stop) is called.
    pub fn spawn_reclaimer(self: &Arc<Self>, interval: Duration, idle: Duration) -> JoinHandle<()> {
        spawn_sweep_task(self.clone(), interval, idle, self.shutdown.child_token())
    }

    // == Stop ==
    /// Terminates the reclamation task.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    // == Reclaim Idle ==
    /// Removes buckets whose last refill is older than `idle`.
    ///
    /// Returns the number of buckets removed.
    pub fn reclaim_idle(&self, idle: Duration) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write();
        let before = buckets.len();

        buckets.retain(|_, bucket| {
            let bucket = bucket.lock();
            now.saturating_duration_since(bucket.last_refill) <= idle
        });

        before - buckets.len()
    }

    /// Number of keys currently holding a bucket.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return bucket.clone();
        }

        self.buckets
            .write()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::full(self.burst, Instant::now()))))
            .clone()
    }
}

impl Limiter for TokenBucketLimiter {
    // == Allow ==
    fn allow(&self, key: &str) -> bool {
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock();

        let now = Instant::now();
        bucket.tokens = bucket.projected(now, self.rate, self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    // == Wait ==
    fn wait(&self, key: &str) -> Duration {
        let Some(bucket) = self.buckets.read().get(key).cloned() else {
            return Duration::ZERO;
        };
        let bucket = bucket.lock();

        let tokens = bucket.projected(Instant::now(), self.rate, self.burst);
        if tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - tokens) / self.rate)
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_burst_then_deny() {
        let limiter = TokenBucketLimiter::new(10.0, 20);

        for i in 0..20 {
            assert!(limiter.allow("k"), "request {} should be allowed", i + 1);
        }
        assert!(!limiter.allow("k"), "21st request should be denied");
    }

    #[test]
    fn test_refill_after_wait() {
        let limiter = TokenBucketLimiter::new(10.0, 2);

        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        // One token accrues every 100ms at 10/s
        sleep(Duration::from_millis(150));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = TokenBucketLimiter::new(1.0, 1);

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
        assert_eq!(limiter.bucket_count(), 2);
    }

    #[test]
    fn test_tokens_never_exceed_burst() {
        let limiter = TokenBucketLimiter::new(1000.0, 3);

        assert!(limiter.allow("k"));
        sleep(Duration::from_millis(50));

        // 50 tokens worth of time elapsed, but the bucket caps at 3
        for _ in 0..3 {
            assert!(limiter.allow("k"));
        }
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn test_wait_unknown_or_available_is_zero() {
        let limiter = TokenBucketLimiter::new(10.0, 5);

        assert_eq!(limiter.wait("unknown"), Duration::ZERO);
        assert!(limiter.allow("k"));
        assert_eq!(limiter.wait("k"), Duration::ZERO);
        // wait does not create buckets
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn test_wait_bounded_by_one_over_rate() {
        let limiter = TokenBucketLimiter::new(2.0, 1);

        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        let wait = limiter.wait("k");
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_millis(500));

        // Advisory only: the bucket is still empty afterwards
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn test_reclaim_idle() {
        let limiter = TokenBucketLimiter::new(10.0, 5);

        limiter.allow("old");
        sleep(Duration::from_millis(60));
        limiter.allow("fresh");

        let removed = limiter.reclaim_idle(Duration::from_millis(30));
        assert_eq!(removed, 1);
        assert_eq!(limiter.bucket_count(), 1);
        assert_eq!(limiter.wait("old"), Duration::ZERO);
    }

    #[test]
    fn test_concurrent_allow_same_key() {
        let limiter = Arc::new(TokenBucketLimiter::new(0.001, 100));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..50).filter(|_| limiter.allow("shared")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }
}
