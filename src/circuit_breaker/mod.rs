//! # Circuit Breaker Module
//!
//! Per-backend three-state protection against cascade failures:
//!
//! - **Closed**: requests pass; consecutive failures are counted.
//! - **Open**: requests are rejected without touching the backend.
//! - **HalfOpen**: exactly one probe request is admitted; its outcome
//!   decides whether the circuit closes or re-opens.
//!
//! The state lives in an `AtomicU8` so the hot path reads it without a
//! lock; every transition and the failure bookkeeping are serialized by a
//! mutex. The Open→HalfOpen transition re-checks the state under that mutex
//! so that concurrent `allow` callers racing past the timeout admit exactly
//! one probe.

use dashmap::DashMap;
use metrics::gauge;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CircuitState {
    /// Normal operation, requests pass through.
    Closed = 0,
    /// Tripped: reject immediately.
    Open = 1,
    /// Testing recovery: one probe in flight.
    HalfOpen = 2,
}

impl CircuitState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

struct BreakerInner {
    failures: u32,
    last_failure: Option<Instant>,
}

/// A single backend's circuit breaker.
pub struct CircuitBreaker {
    backend: String,
    max_failures: u32,
    timeout: Duration,
    state: AtomicU8,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Opens after `max_failures` consecutive failures; transitions to
    /// half-open once `timeout` has passed since the last failure.
    pub fn new(backend: impl Into<String>, max_failures: u32, timeout: Duration) -> Self {
        Self {
            backend: backend.into(),
            max_failures,
            timeout,
            state: AtomicU8::new(CircuitState::Closed as u8),
            inner: Mutex::new(BreakerInner {
                failures: 0,
                last_failure: None,
            }),
        }
    }

    /// Whether a request to this backend may proceed.
    pub fn allow(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,

            CircuitState::Open => {
                let inner = self.inner.lock();
                // Re-check under the lock: a concurrent caller may already
                // have claimed the half-open probe slot.
                if self.state() != CircuitState::Open {
                    return false;
                }
                match inner.last_failure {
                    Some(at) if at.elapsed() >= self.timeout => {
                        self.set_state(CircuitState::HalfOpen);
                        info!(backend = %self.backend, "circuit half-open, admitting probe");
                        true
                    }
                    _ => false,
                }
            }

            // The single probe is already in flight; reject until its
            // outcome is recorded.
            CircuitState::HalfOpen => false,
        }
    }

    /// Record a successful request: resets the failure count and closes a
    /// half-open circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.failures = 0;
        if self.state() == CircuitState::HalfOpen {
            self.set_state(CircuitState::Closed);
            info!(backend = %self.backend, "circuit closed after successful probe");
        }
    }

    /// Record a failed request: may trip the circuit.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures += 1;
        inner.last_failure = Some(Instant::now());

        let state = self.state();
        if state == CircuitState::HalfOpen {
            self.set_state(CircuitState::Open);
            warn!(backend = %self.backend, "probe failed, circuit re-opened");
            return;
        }

        if state == CircuitState::Closed && inner.failures >= self.max_failures {
            self.set_state(CircuitState::Open);
            warn!(
                backend = %self.backend,
                failures = inner.failures,
                "failure threshold reached, circuit opened"
            );
        }
    }

    /// Current state, readable without a lock.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    fn set_state(&self, state: CircuitState) {
        self.state.store(state as u8, Ordering::Release);
        gauge!("gateway_circuit_state", "backend" => self.backend.clone())
            .set(f64::from(state as u8));
    }
}

/// Per-backend breaker map. Entries are created lazily on first sight and
/// never evicted; the backend set is bounded by configuration.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    max_failures: u32,
    timeout: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(max_failures: u32, timeout: Duration) -> Self {
        Self {
            breakers: DashMap::new(),
            max_failures,
            timeout,
        }
    }

    /// A request to an unknown backend is admitted: its fresh breaker
    /// starts closed.
    pub fn allow(&self, backend: &str) -> bool {
        self.get(backend).allow()
    }

    pub fn record_success(&self, backend: &str) {
        self.get(backend).record_success();
    }

    pub fn record_failure(&self, backend: &str) {
        self.get(backend).record_failure();
    }

    pub fn state(&self, backend: &str) -> CircuitState {
        self.get(backend).state()
    }

    fn get(&self, backend: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(backend) {
            return Arc::clone(&breaker);
        }
        Arc::clone(
            &self
                .breakers
                .entry(backend.to_string())
                .or_insert_with(|| {
                    Arc::new(CircuitBreaker::new(backend, self.max_failures, self.timeout))
                }),
        )
    }
}
