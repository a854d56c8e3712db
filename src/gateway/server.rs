//! The gateway's HTTP server: every inbound request falls through to the
//! decision pipeline, and shutdown drains connections before cancelling the
//! background loops (sweeper, prober, config poller).

use crate::core::config::ServerConfig;
use crate::core::error::{GatewayError, GatewayResult};
use crate::gateway::pipeline::RequestPipeline;
use crate::health::CombinedChecker;
use crate::rate_limiting::PerClientLimiter;
use crate::routing::HotReloader;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<RequestPipeline>,
    max_body_bytes: usize,
}

/// Listener plus the background resources it must close on shutdown.
pub struct GatewayServer {
    cfg: ServerConfig,
    pipeline: Arc<RequestPipeline>,
    limiter: Arc<PerClientLimiter>,
    reloader: Arc<HotReloader>,
    checker: Arc<CombinedChecker>,
}

impl GatewayServer {
    pub fn new(
        cfg: ServerConfig,
        pipeline: Arc<RequestPipeline>,
        limiter: Arc<PerClientLimiter>,
        reloader: Arc<HotReloader>,
        checker: Arc<CombinedChecker>,
    ) -> Self {
        Self {
            cfg,
            pipeline,
            limiter,
            reloader,
            checker,
        }
    }

    /// Serve until ctrl-c / SIGTERM, drain, then cancel background loops.
    pub async fn run(self) -> GatewayResult<()> {
        let state = AppState {
            pipeline: Arc::clone(&self.pipeline),
            max_body_bytes: self.cfg.max_body_bytes,
        };
        let app = Router::new().fallback(proxy_handler).with_state(state);

        let listener = tokio::net::TcpListener::bind(&self.cfg.listen_addr).await?;
        info!(addr = %self.cfg.listen_addr, "gateway listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;

        info!("connections drained, closing background tasks");
        self.limiter.close();
        self.reloader.close();
        self.checker.close();
        info!("shutdown complete");
        Ok(())
    }
}

async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();

    let bytes: Bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "failed to buffer request body");
            return GatewayError::config("request body too large or unreadable").into_response();
        }
    };

    match state
        .pipeline
        .handle(parts.method, &parts.uri, &parts.headers, bytes, peer)
        .await
    {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => error!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl-c received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
