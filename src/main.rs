//! Gateway binary: load config, wire the decision fabric, serve.

use clap::Parser;
use edge_gateway::circuit_breaker::CircuitBreakerRegistry;
use edge_gateway::core::config::GatewayConfig;
use edge_gateway::core::error::GatewayResult;
use edge_gateway::gateway::{GatewayServer, HttpForwarder, RequestPipeline};
use edge_gateway::health::{ActiveChecker, CombinedChecker, HealthyPool, PassiveChecker};
use edge_gateway::observability;
use edge_gateway::rate_limiting::PerClientLimiter;
use edge_gateway::routing::HotReloader;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "edge-gateway", about = "HTTP reverse-proxy gateway", version)]
struct Args {
    /// Path to the YAML configuration file (also watched for hot reload).
    #[arg(short, long, default_value = "config/gateway.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> GatewayResult<()> {
    observability::init_tracing();
    let args = Args::parse();

    let cfg = GatewayConfig::load(&args.config)?;
    info!(
        config = %args.config.display(),
        routes = cfg.routes.len(),
        "starting edge-gateway"
    );

    if let Some(addr) = &cfg.server.metrics_addr {
        observability::install_metrics_exporter(addr)?;
        info!(addr = %addr, "metrics exporter listening");
    }

    let limiter = Arc::new(PerClientLimiter::new(
        cfg.rate_limit.capacity,
        cfg.rate_limit.refill_rate,
        cfg.rate_limit.stale_threshold,
    ));

    let reloader = Arc::new(HotReloader::new(&args.config, cfg.server.reload_interval)?);

    let backends = cfg.all_backends();
    let active = ActiveChecker::new(&backends, cfg.health.active.clone())?;
    let passive = PassiveChecker::new(cfg.health.passive.clone());
    let checker = Arc::new(CombinedChecker::new(active, passive));
    let pool = Arc::new(HealthyPool::new(backends, Arc::clone(&checker)));

    let breakers = Arc::new(CircuitBreakerRegistry::new(
        cfg.circuit_breaker.max_failures,
        cfg.circuit_breaker.timeout,
    ));

    let forwarder = Arc::new(HttpForwarder::new(cfg.server.request_timeout)?);

    let pipeline = Arc::new(RequestPipeline::new(
        Arc::clone(&limiter),
        Arc::clone(&reloader),
        pool,
        breakers,
        Arc::clone(&checker),
        forwarder,
    ));

    GatewayServer::new(cfg.server, pipeline, limiter, reloader, checker)
        .run()
        .await
}
