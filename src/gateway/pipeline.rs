//! The request pipeline: composition of the decision fabric.
//!
//! Per request, in order:
//!
//! 1. rate-limit the client key (reject → 429 with Retry-After);
//! 2. match a route against the current table (miss → 404);
//! 3. filter the route's pool through combined health;
//! 4. ask the route's balancer for a backend, skipping picks outside the
//!    healthy set or rejected by their circuit breaker (bounded attempts;
//!    every abandoned pick is released so least-connections stays paired);
//! 5. forward;
//! 6. record the outcome — status >= 500 or transport error is a failure —
//!    into the circuit breaker and the passive health window, exactly once.

use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{affinity_key, client_key, RequestOutcome};
use crate::gateway::forwarder::Forwarder;
use crate::health::{CombinedChecker, HealthyPool};
use crate::rate_limiting::{PerClientLimiter, RateDecision};
use crate::routing::HotReloader;
use axum::body::Bytes;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::Response;
use metrics::{counter, histogram};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Everything a request passes through between the listener and the
/// forwarder.
pub struct RequestPipeline {
    limiter: Arc<PerClientLimiter>,
    reloader: Arc<HotReloader>,
    pool: Arc<HealthyPool>,
    breakers: Arc<CircuitBreakerRegistry>,
    checker: Arc<CombinedChecker>,
    forwarder: Arc<dyn Forwarder>,
}

impl RequestPipeline {
    pub fn new(
        limiter: Arc<PerClientLimiter>,
        reloader: Arc<HotReloader>,
        pool: Arc<HealthyPool>,
        breakers: Arc<CircuitBreakerRegistry>,
        checker: Arc<CombinedChecker>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        Self {
            limiter,
            reloader,
            pool,
            breakers,
            checker,
            forwarder,
        }
    }

    /// Run one request through the full decision pipeline.
    pub async fn handle(
        &self,
        method: Method,
        uri: &Uri,
        headers: &HeaderMap,
        body: Bytes,
        peer: SocketAddr,
    ) -> GatewayResult<Response> {
        counter!("gateway_requests_total").increment(1);

        let client = client_key(headers, peer);
        if let RateDecision::Limited { retry_after } = self.limiter.allow(&client) {
            return Err(GatewayError::RateLimited { retry_after });
        }

        let router = self.reloader.router();
        let path = uri.path();
        let route = router
            .match_request(path, headers)
            .ok_or_else(|| GatewayError::NoRouteMatched {
                path: path.to_string(),
            })?;

        let eligible = self.pool.filter(&route.backends);
        let affinity = affinity_key(headers, peer);
        let backend = self.select_backend(route, &eligible, &affinity)?;

        let path_and_query = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(path)
            .to_string();

        let start = Instant::now();
        let result = self
            .forwarder
            .forward(&backend, method, &path_and_query, headers, body)
            .await;
        histogram!("gateway_upstream_duration_seconds", "backend" => backend.clone())
            .record(start.elapsed().as_secs_f64());

        route.balancer.release(&backend);
        self.record_outcome(&backend, result)
    }

    /// Pick a backend the health filter and circuit breaker both accept.
    ///
    /// Bounded by the route's pool size: a balancer that keeps proposing
    /// rejected backends (consistent hash is sticky by design) runs out of
    /// attempts rather than looping.
    fn select_backend(
        &self,
        route: &crate::routing::Route,
        eligible: &[String],
        affinity: &str,
    ) -> GatewayResult<String> {
        let attempts = route.backends.len().max(1);

        for _ in 0..attempts {
            let Some(backend) = route.balancer.pick(affinity) else {
                break;
            };

            if !eligible.iter().any(|b| *b == backend) {
                debug!(backend = %backend, "skipping unhealthy backend");
                route.balancer.release(&backend);
                continue;
            }

            if !self.breakers.allow(&backend) {
                counter!("gateway_circuit_rejections_total").increment(1);
                debug!(backend = %backend, "skipping backend with open circuit");
                route.balancer.release(&backend);
                continue;
            }

            return Ok(backend);
        }

        counter!("gateway_no_backend_total").increment(1);
        Err(GatewayError::NoBackendAvailable)
    }

    /// Feed the outcome back into the breaker and passive health, then pass
    /// the response (or the transport error) on.
    fn record_outcome(
        &self,
        backend: &str,
        result: GatewayResult<Response>,
    ) -> GatewayResult<Response> {
        let outcome = match &result {
            Ok(response) => RequestOutcome::from_status(response.status()),
            Err(_) => RequestOutcome::Failure,
        };

        if outcome.is_success() {
            self.breakers.record_success(backend);
        } else {
            self.breakers.record_failure(backend);
        }
        self.checker.record(backend, outcome);

        result
    }
}
