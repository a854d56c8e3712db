//! # Error Handling Module
//!
//! All gateway failures funnel into a single [`GatewayError`] enum built with
//! `thiserror`. Each variant knows its HTTP status code, and the `IntoResponse`
//! implementation turns any error into a JSON response, so handlers can use
//! `?` all the way down and still produce well-formed client responses.
//!
//! The taxonomy mirrors the decision pipeline: admission rejections
//! ([`GatewayError::RateLimited`]), selection failures
//! ([`GatewayError::CircuitOpen`], [`GatewayError::NoBackendAvailable`],
//! [`GatewayError::AllBackendsUnhealthy`]), routing misses
//! ([`GatewayError::NoRouteMatched`]), and upstream transport failures
//! ([`GatewayError::Upstream`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the gateway.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// All error conditions the gateway can surface.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Invalid or unreadable configuration (also raised by route-table
    /// validation during hot reload).
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// The client exceeded its rate limit. Carries the duration after which
    /// a retry may succeed.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The per-backend circuit is open and the request was rejected without
    /// contacting the backend.
    #[error("circuit open for backend {backend}")]
    CircuitOpen { backend: String },

    /// Every configured backend failed the health filter (fail-closed path).
    #[error("all backends are unhealthy")]
    AllBackendsUnhealthy,

    /// No route in the active route table matched the request.
    #[error("no route matched path {path}")]
    NoRouteMatched { path: String },

    /// A route matched but no backend could be selected (all skipped by the
    /// health filter or rejected by their circuit breakers).
    #[error("no backend available for matched route")]
    NoBackendAvailable,

    /// The forwarded request failed at the transport level (dial failure,
    /// timeout, connection reset).
    #[error("upstream request to {backend} failed: {source}")]
    Upstream {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// Shorthand for configuration errors.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Map each error variant to the HTTP status the client should see.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::AllBackendsUnhealthy => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoBackendAvailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoRouteMatched { .. } => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Retry-After value in whole seconds, rounded, for rate-limit rejections.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => Some(retry_after.as_secs_f64().round() as u64),
            _ => None,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": status.canonical_reason().unwrap_or("error"),
            "message": self.to_string(),
        }));

        let mut response = (status, body).into_response();
        if let Some(secs) = self.retry_after_secs() {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}
