//! Upstream forwarding.
//!
//! The [`Forwarder`] trait is the seam between the decision fabric and the
//! raw byte-moving proxy: the pipeline decides *which* backend, the
//! forwarder moves the request there. [`HttpForwarder`] is the production
//! implementation on `reqwest`; tests swap in scripted forwarders.

use crate::core::error::{GatewayError, GatewayResult};
use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use std::time::Duration;
use tracing::debug;

/// Headers that are connection-scoped and must not be forwarded in either
/// direction.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Moves one request to a chosen backend and returns the backend's response.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(
        &self,
        backend: &str,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> GatewayResult<Response>;
}

/// HTTP forwarder over a pooled `reqwest` client.
pub struct HttpForwarder {
    client: reqwest::Client,
}

impl HttpForwarder {
    /// `request_timeout` bounds the whole forwarded exchange, connect to
    /// last byte.
    pub fn new(request_timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Forwarder for HttpForwarder {
    async fn forward(
        &self,
        backend: &str,
        method: Method,
        path_and_query: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> GatewayResult<Response> {
        let url = format!("{backend}{path_and_query}");
        debug!(backend = %backend, url = %url, "forwarding upstream");

        let upstream = self
            .client
            .request(method, url)
            .headers(request_headers(headers))
            .body(body)
            .send()
            .await
            .map_err(|source| GatewayError::Upstream {
                backend: backend.to_string(),
                source,
            })?;

        let status = upstream.status();
        let response_headers = strip_hop_by_hop(upstream.headers());
        let bytes = upstream
            .bytes()
            .await
            .map_err(|source| GatewayError::Upstream {
                backend: backend.to_string(),
                source,
            })?;

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Outbound request headers: hop-by-hop stripped, and `host` dropped so the
/// client sets one matching the backend origin.
fn request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = strip_hop_by_hop(headers);
    out.remove("host");
    out
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
