//! Passive health: infer backend health from real-traffic outcomes.
//!
//! Each backend keeps a log of (timestamp, success) pairs trimmed to the
//! configured window on every read and write. A backend is unhealthy once
//! the window holds at least `min_requests` outcomes and the failure rate
//! reaches the threshold — strictly: a rate exactly equal to the threshold
//! is already unhealthy.

use crate::core::config::PassiveHealthConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Instant;

struct OutcomeRecord {
    at: Instant,
    success: bool,
}

/// Windowed error-rate tracker over real request outcomes.
pub struct PassiveChecker {
    backends: DashMap<String, VecDeque<OutcomeRecord>>,
    cfg: PassiveHealthConfig,
}

impl PassiveChecker {
    pub fn new(cfg: PassiveHealthConfig) -> Self {
        Self {
            backends: DashMap::new(),
            cfg,
        }
    }

    pub fn record_success(&self, backend: &str) {
        self.record(backend, true);
    }

    pub fn record_failure(&self, backend: &str) {
        self.record(backend, false);
    }

    fn record(&self, backend: &str, success: bool) {
        let now = Instant::now();
        let mut log = self.backends.entry(backend.to_string()).or_default();
        log.push_back(OutcomeRecord { at: now, success });
        self.trim(&mut log, now);
    }

    /// A backend with no data, or too little data in the window, is assumed
    /// healthy; otherwise its error rate must be strictly below the
    /// threshold.
    pub fn is_healthy(&self, backend: &str) -> bool {
        let Some(mut log) = self.backends.get_mut(backend) else {
            return true;
        };

        self.trim(&mut log, Instant::now());

        if log.len() < self.cfg.min_requests {
            return true;
        }

        let failures = log.iter().filter(|o| !o.success).count();
        let error_rate = failures as f64 / log.len() as f64;
        error_rate < self.cfg.error_threshold
    }

    /// Current error rate in the window, for observability. Zero for
    /// unknown or quiet backends.
    pub fn error_rate(&self, backend: &str) -> f64 {
        let Some(mut log) = self.backends.get_mut(backend) else {
            return 0.0;
        };

        self.trim(&mut log, Instant::now());

        if log.is_empty() {
            return 0.0;
        }
        let failures = log.iter().filter(|o| !o.success).count();
        failures as f64 / log.len() as f64
    }

    fn trim(&self, log: &mut VecDeque<OutcomeRecord>, now: Instant) {
        // checked_sub guards very early process lifetimes where the window
        // reaches past the clock's origin.
        let Some(cutoff) = now.checked_sub(self.cfg.window) else {
            return;
        };
        while log.front().is_some_and(|o| o.at < cutoff) {
            log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn checker(window_ms: u64, threshold: f64, min_requests: usize) -> PassiveChecker {
        PassiveChecker::new(PassiveHealthConfig {
            window: Duration::from_millis(window_ms),
            error_threshold: threshold,
            min_requests,
        })
    }

    #[test]
    fn unknown_backend_is_healthy() {
        let pc = checker(1000, 0.5, 10);
        assert!(pc.is_healthy("http://quiet:1"));
        assert_eq!(pc.error_rate("http://quiet:1"), 0.0);
    }

    #[test]
    fn below_min_requests_is_healthy_regardless_of_rate() {
        let pc = checker(10_000, 0.5, 10);
        for _ in 0..9 {
            pc.record_failure("http://b:1");
        }
        // Nine failures, 100% error rate, but under the minimum sample.
        assert!(pc.is_healthy("http://b:1"));

        pc.record_failure("http://b:1");
        assert!(!pc.is_healthy("http://b:1"));
    }

    #[test]
    fn rate_exactly_at_threshold_is_unhealthy() {
        let pc = checker(10_000, 0.5, 4);
        pc.record_success("http://b:1");
        pc.record_success("http://b:1");
        pc.record_failure("http://b:1");
        pc.record_failure("http://b:1");
        // 2/4 = 0.5: strict comparison makes this unhealthy.
        assert_eq!(pc.error_rate("http://b:1"), 0.5);
        assert!(!pc.is_healthy("http://b:1"));
    }

    #[test]
    fn rate_below_threshold_is_healthy() {
        let pc = checker(10_000, 0.5, 4);
        pc.record_success("http://b:1");
        pc.record_success("http://b:1");
        pc.record_success("http://b:1");
        pc.record_failure("http://b:1");
        assert!(pc.is_healthy("http://b:1"));
    }

    #[test]
    fn outcomes_age_out_of_the_window() {
        let pc = checker(100, 0.5, 2);
        for _ in 0..5 {
            pc.record_failure("http://b:1");
        }
        assert!(!pc.is_healthy("http://b:1"));

        thread::sleep(Duration::from_millis(150));
        // The failures have aged out; the window is empty again.
        assert!(pc.is_healthy("http://b:1"));
        assert_eq!(pc.error_rate("http://b:1"), 0.0);
    }
}
