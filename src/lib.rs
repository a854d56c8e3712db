//! # edge-gateway
//!
//! An HTTP reverse-proxy gateway built around a decision fabric: every
//! request is identified, admitted (rate limit), routed, matched to a
//! healthy backend (balancer + circuit breaker + health filter), forwarded,
//! and its outcome fed back into the breaker and passive health signals.
//!
//! The crate is organized so each subsystem stands alone behind a small
//! contract:
//!
//! - [`load_balancing`]: four selection strategies over fixed pools
//! - [`rate_limiting`]: token bucket, per-client map, sliding window
//! - [`circuit_breaker`]: per-backend three-state machine
//! - [`health`]: active prober + passive window + combined filter + pool
//! - [`routing`]: prefix/header matcher with hot reload
//! - [`gateway`]: the pipeline composing all of the above, plus the
//!   forwarder and server wiring

pub mod circuit_breaker;
pub mod core;
pub mod gateway;
pub mod health;
pub mod load_balancing;
pub mod observability;
pub mod rate_limiting;
pub mod routing;

pub use crate::core::config::GatewayConfig;
pub use crate::core::error::{GatewayError, GatewayResult};
