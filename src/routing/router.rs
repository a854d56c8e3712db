//! Request routing: longest-prefix path match plus required-header match.
//!
//! The route table is compiled once from config and immutable afterwards —
//! hot reload swaps whole routers. Routes are sorted by specificity (longer
//! path prefix first, then more required headers), and matching returns the
//! first hit, so the sort order is the whole precedence story.

use crate::core::config::{GatewayConfig, RouteConfig};
use crate::load_balancing::{build_balancer, Balancer};
use axum::http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;

/// A compiled route: stripped prefix, header requirements, backend pool,
/// and the balancer owning that pool's selection state.
pub struct Route {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub backends: Vec<String>,
    pub balancer: Arc<dyn Balancer>,
}

/// Immutable, specificity-ordered route table.
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Compile a validated config into a route table. Each route gets its
    /// own balancer (per-route strategy override, else the global one), so
    /// replacing the router also replaces all selection state.
    pub fn new(cfg: &GatewayConfig) -> Self {
        let mut routes: Vec<Route> = cfg.routes.iter().map(|rc| compile(cfg, rc)).collect();

        routes.sort_by(|a, b| {
            b.path
                .len()
                .cmp(&a.path.len())
                .then(b.headers.len().cmp(&a.headers.len()))
        });

        Self { routes }
    }

    /// First route whose prefix and header requirements both match.
    pub fn match_request(&self, path: &str, headers: &HeaderMap) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| path.starts_with(&route.path) && headers_match(headers, &route.headers))
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }
}

fn compile(cfg: &GatewayConfig, rc: &RouteConfig) -> Route {
    // Trailing wildcards are only sugar; prefix matching ignores them.
    let path = rc
        .path
        .strip_suffix("/*")
        .or_else(|| rc.path.strip_suffix('*'))
        .unwrap_or(&rc.path)
        .to_string();

    let strategy = rc.strategy.unwrap_or(cfg.load_balancing.strategy);
    let balancer = build_balancer(strategy, cfg.load_balancing.replicas, &rc.backends);

    Route {
        path,
        headers: rc.headers.clone(),
        backends: rc.backends.iter().map(|b| b.url().to_string()).collect(),
        balancer,
    }
}

/// All required headers must match. The sentinel value `*` demands presence
/// with any non-empty value; anything else demands exact equality.
fn headers_match(headers: &HeaderMap, required: &HashMap<String, String>) -> bool {
    required.iter().all(|(name, expected)| {
        let got = headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if expected == "*" {
            !got.is_empty()
        } else {
            got == expected
        }
    })
}
