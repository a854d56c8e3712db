//! Active health probing.
//!
//! A background task sweeps all monitored backends concurrently — once at
//! startup and then every interval — issuing `GET <backend><path>` bounded
//! by the per-probe timeout. A 2xx response is a success; anything else
//! (non-2xx, transport error, timeout) is a failure. Status flips only
//! after the configured number of consecutive outcomes, so a single flaky
//! probe cannot flap a backend.

use super::Status;
use crate::core::config::ActiveHealthConfig;
use crate::core::error::GatewayResult;
use dashmap::DashMap;
use futures::future::join_all;
use metrics::gauge;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Default)]
struct ProbeState {
    status: Status,
    consecutive_successes: u32,
    consecutive_failures: u32,
}

struct ActiveInner {
    backends: DashMap<String, ProbeState>,
    client: reqwest::Client,
    cfg: ActiveHealthConfig,
}

/// Periodic prober over a dynamic backend set.
pub struct ActiveChecker {
    inner: Arc<ActiveInner>,
    shutdown: watch::Sender<bool>,
}

impl ActiveChecker {
    /// Start monitoring `backends`. Spawns the probe loop; must be called
    /// from within a tokio runtime.
    pub fn new(backends: &[String], cfg: ActiveHealthConfig) -> GatewayResult<Self> {
        let client = reqwest::Client::builder().timeout(cfg.timeout).build()?;

        let inner = Arc::new(ActiveInner {
            backends: DashMap::new(),
            client,
            cfg,
        });
        for backend in backends {
            inner.backends.insert(backend.clone(), ProbeState::default());
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(probe_loop(Arc::clone(&inner), shutdown_rx));

        Ok(Self { inner, shutdown })
    }

    /// Healthy or not-yet-probed backends pass; so do backends this checker
    /// has never heard of (optimistic).
    pub fn is_healthy(&self, backend: &str) -> bool {
        match self.inner.backends.get(backend) {
            Some(state) => matches!(state.status, Status::Healthy | Status::Unknown),
            None => true,
        }
    }

    pub fn status(&self, backend: &str) -> Status {
        self.inner
            .backends
            .get(backend)
            .map(|state| state.status)
            .unwrap_or(Status::Unknown)
    }

    /// Snapshot of every monitored backend's status.
    pub fn all_status(&self) -> HashMap<String, Status> {
        self.inner
            .backends
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status))
            .collect()
    }

    /// Start monitoring a backend. No-op if already monitored.
    pub fn add_backend(&self, backend: &str) {
        self.inner
            .backends
            .entry(backend.to_string())
            .or_default();
    }

    /// Stop monitoring a backend.
    pub fn remove_backend(&self, backend: &str) {
        self.inner.backends.remove(backend);
    }

    /// Cancel the probe loop. An in-flight sweep is dropped without
    /// recording further state.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for ActiveChecker {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn probe_loop(inner: Arc<ActiveInner>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.cfg.interval);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            // The first tick fires immediately, giving the startup sweep.
            _ = async { ticker.tick().await; probe_all(&inner).await } => {}
        }
    }
}

async fn probe_all(inner: &ActiveInner) {
    let backends: Vec<String> = inner
        .backends
        .iter()
        .map(|entry| entry.key().clone())
        .collect();

    join_all(backends.iter().map(|backend| probe(inner, backend))).await;
}

async fn probe(inner: &ActiveInner, backend: &str) {
    let url = format!("{backend}{}", inner.cfg.path);

    let success = match inner.client.get(&url).send().await {
        Ok(response) => response.status().is_success(),
        Err(err) => {
            debug!(backend = %backend, error = %err, "health probe failed");
            false
        }
    };

    if success {
        record_success(inner, backend);
    } else {
        record_failure(inner, backend);
    }
}

fn record_success(inner: &ActiveInner, backend: &str) {
    let Some(mut state) = inner.backends.get_mut(backend) else {
        return; // removed while the probe was in flight
    };

    state.consecutive_successes += 1;
    state.consecutive_failures = 0;

    if state.consecutive_successes >= inner.cfg.healthy_threshold
        && state.status != Status::Healthy
    {
        state.status = Status::Healthy;
        info!(backend = %backend, "backend marked healthy");
        gauge!("gateway_backend_healthy", "backend" => backend.to_string()).set(1.0);
    }
}

fn record_failure(inner: &ActiveInner, backend: &str) {
    let Some(mut state) = inner.backends.get_mut(backend) else {
        return;
    };

    state.consecutive_failures += 1;
    state.consecutive_successes = 0;

    if state.consecutive_failures >= inner.cfg.unhealthy_threshold
        && state.status != Status::Unhealthy
    {
        state.status = Status::Unhealthy;
        warn!(backend = %backend, "backend marked unhealthy");
        gauge!("gateway_backend_healthy", "backend" => backend.to_string()).set(0.0);
    }
}
