//! Request-facing vocabulary shared across the pipeline: client identity for
//! rate limiting, affinity keys for consistent hashing, and the
//! success/failure outcome fed back into the breaker and passive health.

use axum::http::{HeaderMap, StatusCode};
use std::fmt;
use std::net::SocketAddr;

/// Outcome of a forwarded request as seen by the decision fabric.
///
/// Any response with status >= 500, or a transport-level error, counts as a
/// failure; everything else (including 4xx) is a success, since a 4xx says
/// nothing about backend health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    Failure,
}

impl RequestOutcome {
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            Self::Failure
        } else {
            Self::Success
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Identity used for rate-limit bucketing: the `x-api-key` header when
/// present, otherwise the peer IP.
pub fn client_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(key) = header_str(headers, "x-api-key") {
        return key.to_string();
    }
    peer.ip().to_string()
}

/// Routing-affinity key for consistent hashing.
///
/// Priority: session ID, then user ID, then a bearer-token prefix, then the
/// peer IP. The token is truncated so the key stays stable across token
/// refreshes that keep the same prefix scheme, and never logs a full
/// credential.
pub fn affinity_key(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(session) = header_str(headers, "x-session-id") {
        return format!("session:{session}");
    }
    if let Some(user) = header_str(headers, "x-user-id") {
        return format!("user:{user}");
    }
    if let Some(auth) = header_str(headers, "authorization") {
        if let Some(token) = auth.strip_prefix("Bearer ") {
            let prefix: String = token.chars().take(16).collect();
            return format!("token:{prefix}");
        }
    }
    format!("ip:{}", peer.ip())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> SocketAddr {
        "192.0.2.7:55000".parse().unwrap()
    }

    #[test]
    fn outcome_from_status() {
        assert_eq!(
            RequestOutcome::from_status(StatusCode::OK),
            RequestOutcome::Success
        );
        assert_eq!(
            RequestOutcome::from_status(StatusCode::NOT_FOUND),
            RequestOutcome::Success
        );
        assert_eq!(
            RequestOutcome::from_status(StatusCode::INTERNAL_SERVER_ERROR),
            RequestOutcome::Failure
        );
        assert_eq!(
            RequestOutcome::from_status(StatusCode::BAD_GATEWAY),
            RequestOutcome::Failure
        );
    }

    #[test]
    fn client_key_prefers_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("key-123"));
        assert_eq!(client_key(&headers, peer()), "key-123");
        assert_eq!(client_key(&HeaderMap::new(), peer()), "192.0.2.7");
    }

    #[test]
    fn affinity_key_priority_order() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abcdef"));
        headers.insert("x-user-id", HeaderValue::from_static("u1"));
        headers.insert("x-session-id", HeaderValue::from_static("s1"));
        assert_eq!(affinity_key(&headers, peer()), "session:s1");

        headers.remove("x-session-id");
        assert_eq!(affinity_key(&headers, peer()), "user:u1");

        headers.remove("x-user-id");
        assert_eq!(affinity_key(&headers, peer()), "token:abcdef");

        headers.remove("authorization");
        assert_eq!(affinity_key(&headers, peer()), "ip:192.0.2.7");
    }
}
