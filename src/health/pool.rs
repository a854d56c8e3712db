//! Health-filtered backend pool.
//!
//! Wraps the configured backend list and the combined checker. The default
//! accessor fails open: when the filter would leave nothing, the full list
//! is returned on the theory that a detector rejecting everything is more
//! likely wrong than every backend being down at once. `healthy_or_error`
//! is the fail-closed variant for callers that prefer refusing traffic.

use super::CombinedChecker;
use crate::core::error::{GatewayError, GatewayResult};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// A backend pool filtered through the combined health checker.
pub struct HealthyPool {
    all: RwLock<Vec<String>>,
    checker: Arc<CombinedChecker>,
}

impl HealthyPool {
    pub fn new(backends: Vec<String>, checker: Arc<CombinedChecker>) -> Self {
        Self {
            all: RwLock::new(backends),
            checker,
        }
    }

    /// Currently healthy backends; the full list when the filter comes up
    /// empty (fail-open).
    pub fn healthy(&self) -> Vec<String> {
        let all = self.all.read();
        let healthy = Self::passing(&all, &self.checker);

        if healthy.is_empty() {
            warn!("no backend passed the health filter, failing open");
            return all.clone();
        }
        healthy
    }

    /// Currently healthy backends, or an error when none pass (fail-closed).
    pub fn healthy_or_error(&self) -> GatewayResult<Vec<String>> {
        let all = self.all.read();
        let healthy = Self::passing(&all, &self.checker);

        if healthy.is_empty() {
            return Err(GatewayError::AllBackendsUnhealthy);
        }
        Ok(healthy)
    }

    /// Restrict an arbitrary candidate list (a route's pool) to its healthy
    /// members, with the same fail-open rule as [`healthy`](Self::healthy).
    pub fn filter(&self, candidates: &[String]) -> Vec<String> {
        let healthy = Self::passing(candidates, &self.checker);

        if healthy.is_empty() {
            warn!("no candidate passed the health filter, failing open");
            return candidates.to_vec();
        }
        healthy
    }

    /// Every configured backend, regardless of health.
    pub fn all(&self) -> Vec<String> {
        self.all.read().clone()
    }

    /// Add a backend to the pool and to active monitoring.
    pub fn add_backend(&self, backend: &str) {
        let mut all = self.all.write();
        if !all.iter().any(|b| b == backend) {
            all.push(backend.to_string());
        }
        self.checker.add_backend(backend);
    }

    /// Remove a backend from the pool and from active monitoring.
    pub fn remove_backend(&self, backend: &str) {
        let mut all = self.all.write();
        all.retain(|b| b != backend);
        self.checker.remove_backend(backend);
    }

    fn passing(candidates: &[String], checker: &CombinedChecker) -> Vec<String> {
        candidates
            .iter()
            .filter(|b| checker.is_healthy(b))
            .cloned()
            .collect()
    }
}
