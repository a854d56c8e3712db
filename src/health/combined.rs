//! Combined health verdict: active AND passive.
//!
//! Active probing catches idle-backend failures; passive observation
//! catches under-load failures. Requiring both keeps each detector's blind
//! spot covered by the other.

use super::{ActiveChecker, PassiveChecker, Status};
use crate::core::types::RequestOutcome;

/// Owns both checkers and ANDs their verdicts.
pub struct CombinedChecker {
    active: ActiveChecker,
    passive: PassiveChecker,
}

impl CombinedChecker {
    pub fn new(active: ActiveChecker, passive: PassiveChecker) -> Self {
        Self { active, passive }
    }

    /// Healthy only if both the active and passive signals agree.
    pub fn is_healthy(&self, backend: &str) -> bool {
        self.active.is_healthy(backend) && self.passive.is_healthy(backend)
    }

    /// Real-traffic outcomes feed the passive side only; the active checker
    /// sees nothing but its own probes.
    pub fn record_success(&self, backend: &str) {
        self.passive.record_success(backend);
    }

    pub fn record_failure(&self, backend: &str) {
        self.passive.record_failure(backend);
    }

    pub fn record(&self, backend: &str, outcome: RequestOutcome) {
        if outcome.is_success() {
            self.record_success(backend);
        } else {
            self.record_failure(backend);
        }
    }

    pub fn active_status(&self, backend: &str) -> Status {
        self.active.status(backend)
    }

    pub fn passive_error_rate(&self, backend: &str) -> f64 {
        self.passive.error_rate(backend)
    }

    /// Pool membership changes pass through to the active prober; the
    /// passive side tracks whatever traffic it sees.
    pub fn add_backend(&self, backend: &str) {
        self.active.add_backend(backend);
    }

    pub fn remove_backend(&self, backend: &str) {
        self.active.remove_backend(backend);
    }

    /// Stop the active probe loop.
    pub fn close(&self) {
        self.active.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ActiveHealthConfig, PassiveHealthConfig};
    use std::time::Duration;

    fn combined() -> CombinedChecker {
        let active = ActiveChecker::new(
            &[],
            ActiveHealthConfig {
                interval: Duration::from_secs(3600),
                ..ActiveHealthConfig::default()
            },
        )
        .unwrap();
        let passive = PassiveChecker::new(PassiveHealthConfig {
            window: Duration::from_secs(10),
            error_threshold: 0.5,
            min_requests: 2,
        });
        CombinedChecker::new(active, passive)
    }

    #[tokio::test]
    async fn passive_failures_override_active_optimism() {
        let checker = combined();
        // Active has never probed this backend: optimistically healthy.
        assert!(checker.is_healthy("http://b:1"));

        checker.record("http://b:1", RequestOutcome::Failure);
        checker.record_failure("http://b:1");
        assert!(!checker.is_healthy("http://b:1"));

        checker.close();
    }

    #[tokio::test]
    async fn successes_keep_backend_healthy() {
        let checker = combined();
        checker.record_success("http://b:1");
        checker.record("http://b:1", RequestOutcome::Success);
        assert!(checker.is_healthy("http://b:1"));
        assert_eq!(checker.passive_error_rate("http://b:1"), 0.0);
        checker.close();
    }
}
