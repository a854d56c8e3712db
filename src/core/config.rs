//! # Configuration Module
//!
//! YAML configuration for the gateway: the route table plus tuning sections
//! for the rate limiter, circuit breaker, health checkers, and load
//! balancing. Durations are written human-style (`"30s"`, `"250ms"`) via
//! `humantime_serde`.
//!
//! Validation is separate from parsing so the hot-reload path can reject a
//! syntactically valid but semantically broken table while keeping the
//! previous one live. Validation errors always name the offending route
//! index.

use crate::core::error::{GatewayError, GatewayResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Ordered route definitions. Specificity sorting happens at router
    /// build time, not here.
    pub routes: Vec<RouteConfig>,

    #[serde(default)]
    pub load_balancing: LoadBalancingConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub health: HealthConfig,
}

/// Listener and forwarding settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the gateway listens on.
    pub listen_addr: String,

    /// Optional address for the Prometheus metrics exporter. Disabled when
    /// absent.
    #[serde(default)]
    pub metrics_addr: Option<String>,

    /// Upper bound on a forwarded request, connect to last byte.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How often the hot reloader polls the config file for changes.
    #[serde(with = "humantime_serde")]
    pub reload_interval: Duration,

    /// Maximum request body the gateway will buffer before forwarding.
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            metrics_addr: None,
            request_timeout: Duration::from_secs(30),
            reload_interval: Duration::from_secs(5),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

/// A single route: path prefix, required headers, backend pool.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Path prefix to match. A trailing `/*` or `*` is stripped at router
    /// build time.
    pub path: String,

    /// Headers that must all match. The value `"*"` means the header must be
    /// present with any non-empty value.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Backend origins for this route.
    pub backends: Vec<BackendSpec>,

    /// Per-route balancer strategy override. Falls back to the global
    /// `load_balancing.strategy` when absent.
    #[serde(default)]
    pub strategy: Option<Strategy>,
}

/// A backend is either a bare origin URL or an origin with a weight.
///
/// ```yaml
/// backends:
///   - http://a:8080
///   - url: http://b:8080
///     weight: 3
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum BackendSpec {
    Url(String),
    Weighted {
        url: String,
        #[serde(default = "default_weight")]
        weight: i32,
    },
}

fn default_weight() -> i32 {
    1
}

impl BackendSpec {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Weighted { url, .. } => url,
        }
    }

    /// Configured weight. Non-positive weights default to 1 at balancer
    /// construction, not here, so the config round-trips unchanged.
    pub fn weight(&self) -> i32 {
        match self {
            Self::Url(_) => 1,
            Self::Weighted { weight, .. } => *weight,
        }
    }
}

/// Balancer strategy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    ConsistentHash,
}

/// Global load-balancing settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancingConfig {
    pub strategy: Strategy,

    /// Virtual nodes per backend on the consistent-hash ring.
    pub replicas: usize,
}

impl Default for LoadBalancingConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::RoundRobin,
            replicas: 150,
        }
    }
}

/// Per-client token bucket settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Burst size: tokens a fresh bucket starts with.
    pub capacity: u32,

    /// Sustained tokens per second. Zero is legal and yields a one-shot
    /// budget of `capacity` requests.
    pub refill_rate: f64,

    /// Idle time after which a client's bucket is swept away.
    #[serde(with = "humantime_serde")]
    pub stale_threshold: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_rate: 10.0,
            stale_threshold: Duration::from_secs(600),
        }
    }
}

/// Circuit breaker thresholds, shared by every per-backend breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub max_failures: u32,

    /// How long an open circuit waits before admitting a half-open probe.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Health checking settings, active and passive.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub active: ActiveHealthConfig,

    #[serde(default)]
    pub passive: PassiveHealthConfig,
}

/// Active prober settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActiveHealthConfig {
    /// Time between probe sweeps.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Per-probe timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Path appended to each backend origin, e.g. `/health`.
    pub path: String,

    /// Consecutive successful probes before a backend is marked healthy.
    pub healthy_threshold: u32,

    /// Consecutive failed probes before a backend is marked unhealthy.
    pub unhealthy_threshold: u32,
}

impl Default for ActiveHealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(2),
            path: "/health".to_string(),
            healthy_threshold: 2,
            unhealthy_threshold: 3,
        }
    }
}

/// Passive (real-traffic) health settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PassiveHealthConfig {
    /// How far back outcomes count toward the error rate.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Error rate at or above which a backend is unhealthy.
    pub error_threshold: f64,

    /// Minimum outcomes in the window before the error rate is judged.
    pub min_requests: usize,
}

impl Default for PassiveHealthConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(30),
            error_threshold: 0.5,
            min_requests: 10,
        }
    }
}

impl GatewayConfig {
    /// Read, parse, and validate a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_yaml(&data)
    }

    /// Parse and validate YAML config text.
    pub fn from_yaml(data: &str) -> GatewayResult<Self> {
        let cfg: Self = serde_yaml::from_str(data)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Semantic validation beyond what serde enforces.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.routes.is_empty() {
            return Err(GatewayError::config("config must have at least one route"));
        }

        for (i, route) in self.routes.iter().enumerate() {
            if route.path.is_empty() {
                return Err(GatewayError::config(format!(
                    "route {i}: path cannot be empty"
                )));
            }
            if route.backends.is_empty() {
                return Err(GatewayError::config(format!(
                    "route {i} ({}): must have at least one backend",
                    route.path
                )));
            }
        }

        Ok(())
    }

    /// Deduplicated union of every backend origin across all routes, in
    /// first-seen order. This is the set the health subsystem monitors.
    pub fn all_backends(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut all = Vec::new();
        for route in &self.routes {
            for backend in &route.backends {
                if seen.insert(backend.url().to_string()) {
                    all.push(backend.url().to_string());
                }
            }
        }
        all
    }
}
