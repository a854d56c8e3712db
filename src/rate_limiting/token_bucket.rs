//! Token bucket with lazy refill.
//!
//! Tokens accrue as a function of elapsed time at each `allow` call instead
//! of via a background ticker, so an idle bucket costs nothing. Fractional
//! tokens are kept so slow refill rates round correctly over time.

use super::RateDecision;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A single token bucket. Starts full.
pub struct TokenBucket {
    capacity: f64,
    rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// `capacity` is the burst size; `rate` is tokens per second. A rate of
    /// zero is legal and yields a one-shot budget of `capacity` requests.
    pub fn new(capacity: u32, rate: f64) -> Self {
        Self {
            capacity: f64::from(capacity),
            rate,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Consume one token, or report how long until one is available.
    pub fn allow(&self) -> RateDecision {
        let mut state = self.state.lock();

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            return RateDecision::Allowed;
        }

        let deficit = 1.0 - state.tokens;
        let retry_after = if self.rate > 0.0 {
            Duration::from_secs_f64(deficit / self.rate)
        } else {
            // No refill: the bucket will never recover on its own.
            Duration::MAX
        };
        RateDecision::Limited { retry_after }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn allows_full_burst_then_rejects() {
        let bucket = TokenBucket::new(5, 1.0);
        for i in 0..5 {
            assert!(bucket.allow().is_allowed(), "request {i} should pass");
        }

        let decision = bucket.allow();
        assert!(!decision.is_allowed());
        assert!(decision.retry_after().unwrap() > Duration::ZERO);
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(2, 10.0);
        assert!(bucket.allow().is_allowed());
        assert!(bucket.allow().is_allowed());
        assert!(!bucket.allow().is_allowed());

        // At 10 tokens/sec one token arrives within 100ms.
        thread::sleep(Duration::from_millis(150));
        assert!(bucket.allow().is_allowed());
    }

    #[test]
    fn refill_never_exceeds_capacity() {
        let bucket = TokenBucket::new(3, 100.0);
        thread::sleep(Duration::from_millis(100));

        let allowed = (0..10).filter(|_| bucket.allow().is_allowed()).count();
        assert_eq!(allowed, 3);
    }

    #[test]
    fn zero_rate_is_one_shot() {
        let bucket = TokenBucket::new(2, 0.0);
        assert!(bucket.allow().is_allowed());
        assert!(bucket.allow().is_allowed());

        let decision = bucket.allow();
        assert!(!decision.is_allowed());
        assert_eq!(decision.retry_after(), Some(Duration::MAX));

        thread::sleep(Duration::from_millis(50));
        assert!(!bucket.allow().is_allowed(), "zero rate never refills");
    }

    #[test]
    fn concurrent_burst_admits_exactly_capacity() {
        let bucket = Arc::new(TokenBucket::new(100, 0.0));
        let admitted = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let bucket = Arc::clone(&bucket);
            let admitted = Arc::clone(&admitted);
            handles.push(thread::spawn(move || {
                for _ in 0..25 {
                    if bucket.allow().is_allowed() {
                        admitted.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::Relaxed), 100);
    }
}
