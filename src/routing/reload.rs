//! Hot reload: watch the config file and atomically swap the route table.
//!
//! A background task polls the file's modification time — polling rather
//! than OS file notification for portability; the interval is tunable. On a
//! newer mtime the file is re-read, re-parsed, and re-validated; only a
//! fully valid table is published. A broken edit is logged and the previous
//! router stays live. The active router sits in an [`ArcSwap`] so request
//! paths read it without locking.

use super::Router;
use crate::core::config::GatewayConfig;
use crate::core::error::GatewayResult;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{info, warn};

struct ReloadInner {
    config_path: PathBuf,
    current: ArcSwap<Router>,
    last_modified: Mutex<SystemTime>,
}

/// Owns the active router and the poll loop that refreshes it.
pub struct HotReloader {
    inner: Arc<ReloadInner>,
    shutdown: watch::Sender<bool>,
}

impl HotReloader {
    /// Load the initial config (which must be valid) and start polling it
    /// every `interval`. Must be called from within a tokio runtime.
    pub fn new<P: AsRef<Path>>(config_path: P, interval: Duration) -> GatewayResult<Self> {
        let config_path = config_path.as_ref().to_path_buf();

        let cfg = GatewayConfig::load(&config_path)?;
        let modified = std::fs::metadata(&config_path)?.modified()?;

        let inner = Arc::new(ReloadInner {
            config_path,
            current: ArcSwap::from_pointee(Router::new(&cfg)),
            last_modified: Mutex::new(modified),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(poll_loop(Arc::clone(&inner), interval, shutdown_rx));

        Ok(Self { inner, shutdown })
    }

    /// Current route table, lock-free.
    pub fn router(&self) -> Arc<Router> {
        self.inner.current.load_full()
    }

    /// Stop the poll loop.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

impl Drop for HotReloader {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn poll_loop(inner: Arc<ReloadInner>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // the immediate first tick; the file was just loaded

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = ticker.tick() => check_and_reload(&inner),
        }
    }
}

fn check_and_reload(inner: &ReloadInner) {
    let modified = match std::fs::metadata(&inner.config_path).and_then(|m| m.modified()) {
        Ok(modified) => modified,
        Err(err) => {
            warn!(error = %err, "hot reload: cannot stat config file");
            return;
        }
    };

    {
        let last = inner.last_modified.lock();
        if modified <= *last {
            return;
        }
    }

    info!(path = %inner.config_path.display(), "hot reload: config file changed");

    let cfg = match GatewayConfig::load(&inner.config_path) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!(error = %err, "hot reload: invalid config, keeping previous route table");
            return;
        }
    };

    let router = Router::new(&cfg);
    let routes = router.route_count();
    inner.current.store(Arc::new(router));
    *inner.last_modified.lock() = modified;

    info!(routes, "hot reload: route table replaced");
}
