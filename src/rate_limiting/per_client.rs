//! Per-client rate limiting: one token bucket per client key.
//!
//! Buckets are created lazily on a client's first request and removed by a
//! background sweeper once idle longer than the stale threshold — the only
//! mechanism bounding the map's memory. Last-access times are kept as
//! milliseconds past the limiter's own epoch in an atomic, so the hot path
//! touches the concurrent map read-side only.

use super::{RateDecision, TokenBucket};
use dashmap::DashMap;
use metrics::counter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

struct ClientEntry {
    bucket: TokenBucket,
    last_access_ms: AtomicU64,
}

/// Per-client token bucket map with background eviction.
pub struct PerClientLimiter {
    clients: Arc<DashMap<String, ClientEntry>>,
    capacity: u32,
    rate: f64,
    epoch: std::time::Instant,
    shutdown: watch::Sender<bool>,
}

impl PerClientLimiter {
    /// Each new client gets a bucket with `capacity` burst and `rate`
    /// tokens/sec. Entries idle longer than `stale_threshold` are swept; the
    /// sweeper runs every `stale_threshold / 2`. Must be called from within
    /// a tokio runtime.
    pub fn new(capacity: u32, rate: f64, stale_threshold: Duration) -> Self {
        let clients: Arc<DashMap<String, ClientEntry>> = Arc::new(DashMap::new());
        let epoch = std::time::Instant::now();
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweep_loop(
            Arc::clone(&clients),
            epoch,
            stale_threshold,
            shutdown_rx,
        ));

        Self {
            clients,
            capacity,
            rate,
            epoch,
            shutdown,
        }
    }

    /// Check the rate limit for one client key, creating its bucket on
    /// first sight.
    pub fn allow(&self, key: &str) -> RateDecision {
        let now_ms = self.epoch.elapsed().as_millis() as u64;

        if let Some(entry) = self.clients.get(key) {
            entry.last_access_ms.store(now_ms, Ordering::Relaxed);
            return self.decide(key, entry.bucket.allow());
        }

        let entry = self
            .clients
            .entry(key.to_string())
            .or_insert_with(|| ClientEntry {
                bucket: TokenBucket::new(self.capacity, self.rate),
                last_access_ms: AtomicU64::new(now_ms),
            });
        let decision = entry.bucket.allow();
        drop(entry);
        self.decide(key, decision)
    }

    fn decide(&self, key: &str, decision: RateDecision) -> RateDecision {
        if !decision.is_allowed() {
            counter!("gateway_rate_limited_total").increment(1);
            debug!(client = %key, "rate limit exceeded");
        }
        decision
    }

    /// Number of tracked clients, for observability and tests.
    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }

    /// Whether a client currently has a bucket (it may have been swept).
    pub fn contains(&self, key: &str) -> bool {
        self.clients.contains_key(key)
    }

    /// Stop the background sweeper.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for PerClientLimiter {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn sweep_loop(
    clients: Arc<DashMap<String, ClientEntry>>,
    epoch: std::time::Instant,
    stale_threshold: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = (stale_threshold / 2).max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval(period);
    let stale_ms = stale_threshold.as_millis() as u64;

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => {
                let now_ms = epoch.elapsed().as_millis() as u64;
                let before = clients.len();
                clients.retain(|_, entry| {
                    now_ms.saturating_sub(entry.last_access_ms.load(Ordering::Relaxed)) <= stale_ms
                });
                let swept = before - clients.len();
                if swept > 0 {
                    debug!(swept, remaining = clients.len(), "swept stale client buckets");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn clients_are_isolated() {
        let limiter = PerClientLimiter::new(2, 0.0, Duration::from_secs(60));

        assert!(limiter.allow("a").is_allowed());
        assert!(limiter.allow("a").is_allowed());
        assert!(!limiter.allow("a").is_allowed());

        // Exhausting A must not affect B.
        assert!(limiter.allow("b").is_allowed());
        limiter.close();
    }

    #[tokio::test]
    async fn buckets_created_lazily() {
        let limiter = PerClientLimiter::new(1, 0.0, Duration::from_secs(60));
        assert_eq!(limiter.tracked_clients(), 0);

        limiter.allow("a");
        limiter.allow("b");
        assert_eq!(limiter.tracked_clients(), 2);
        limiter.close();
    }

    #[tokio::test]
    async fn idle_entries_are_swept() {
        let limiter = PerClientLimiter::new(5, 0.0, Duration::from_millis(100));
        limiter.allow("idle-client");
        assert!(limiter.contains("idle-client"));

        // Well past 2x the stale threshold; the sweeper runs every 50ms.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!limiter.contains("idle-client"));
        limiter.close();
    }

    #[tokio::test]
    async fn active_entries_survive_sweeps() {
        let limiter = PerClientLimiter::new(1000, 0.0, Duration::from_millis(100));
        for _ in 0..6 {
            limiter.allow("busy-client");
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert!(limiter.contains("busy-client"));
        limiter.close();
    }
}
