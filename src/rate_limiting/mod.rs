//! # Rate Limiting Module
//!
//! Admission control with a retry-after hint on rejection. Three algorithms:
//!
//! - [`TokenBucket`]: burst up to capacity, sustained refill rate, lazy
//!   refill (no background ticker).
//! - [`PerClientLimiter`]: one bucket per client key, lazily created,
//!   swept by a background task when idle.
//! - [`SlidingWindow`]: two-counter approximation of a true sliding window
//!   in constant memory, closing the fixed-window boundary-burst hole.

pub mod per_client;
pub mod sliding_window;
pub mod token_bucket;

pub use per_client::PerClientLimiter;
pub use sliding_window::SlidingWindow;
pub use token_bucket::TokenBucket;

use std::time::Duration;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Rejected; `retry_after` estimates when a retry could succeed.
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allowed)
    }

    pub fn retry_after(self) -> Option<Duration> {
        match self {
            Self::Allowed => None,
            Self::Limited { retry_after } => Some(retry_after),
        }
    }
}
