//! Sliding window counter.
//!
//! Fixed windows allow a 2x burst straddling the boundary. This limiter
//! weights the previous window's count by how much of it still overlaps the
//! sliding window:
//!
//! ```text
//! effective = prev_count * (1 - elapsed/window) + curr_count
//! ```
//!
//! Two counters and a timestamp — constant memory at any request volume.

use super::RateDecision;
use parking_lot::Mutex;
use std::time::{Duration, Instant};

struct WindowState {
    window_start: Instant,
    prev_count: u32,
    curr_count: u32,
}

/// Sliding window limiter allowing `max_requests` per `window_size`.
pub struct SlidingWindow {
    max_requests: u32,
    window_size: Duration,
    state: Mutex<WindowState>,
}

impl SlidingWindow {
    pub fn new(max_requests: u32, window_size: Duration) -> Self {
        Self {
            max_requests,
            window_size,
            state: Mutex::new(WindowState {
                window_start: Instant::now(),
                prev_count: 0,
                curr_count: 0,
            }),
        }
    }

    pub fn allow(&self) -> RateDecision {
        let mut state = self.state.lock();

        let now = Instant::now();
        let mut elapsed = now.duration_since(state.window_start);

        if elapsed >= 2 * self.window_size {
            // Idle for two full windows: nothing left to weight.
            state.prev_count = 0;
            state.curr_count = 0;
            state.window_start = now;
            elapsed = Duration::ZERO;
        } else if elapsed >= self.window_size {
            // Current window finished: rotate.
            state.prev_count = state.curr_count;
            state.curr_count = 0;
            state.window_start += self.window_size;
            elapsed = now.duration_since(state.window_start);
        }

        let weight =
            (1.0 - elapsed.as_secs_f64() / self.window_size.as_secs_f64()).max(0.0);
        let effective = f64::from(state.prev_count) * weight + f64::from(state.curr_count);

        if effective + 1.0 > f64::from(self.max_requests) {
            let retry_after = self.window_size.saturating_sub(elapsed);
            return RateDecision::Limited { retry_after };
        }

        state.curr_count += 1;
        RateDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fills_to_limit_then_rejects() {
        let window = SlidingWindow::new(5, Duration::from_secs(10));
        for i in 0..5 {
            assert!(window.allow().is_allowed(), "request {i}");
        }

        let decision = window.allow();
        assert!(!decision.is_allowed());
        assert!(decision.retry_after().unwrap() > Duration::ZERO);
    }

    #[test]
    fn previous_window_weight_blocks_boundary_burst() {
        let window = SlidingWindow::new(10, Duration::from_millis(100));
        for _ in 0..10 {
            assert!(window.allow().is_allowed());
        }

        // 10ms into the next window the previous one still weighs ~0.9, so
        // only a few of the next attempts can squeeze in.
        thread::sleep(Duration::from_millis(110));
        let admitted = (0..5).filter(|_| window.allow().is_allowed()).count();
        assert!(admitted <= 3, "boundary admitted {admitted} of 5");
    }

    #[test]
    fn resets_after_two_idle_windows() {
        let window = SlidingWindow::new(5, Duration::from_millis(50));
        for _ in 0..5 {
            assert!(window.allow().is_allowed());
        }
        assert!(!window.allow().is_allowed());

        thread::sleep(Duration::from_millis(120));
        for i in 0..5 {
            assert!(window.allow().is_allowed(), "request {i} after reset");
        }
    }

    #[test]
    fn retry_after_never_exceeds_window() {
        let window = SlidingWindow::new(1, Duration::from_millis(100));
        assert!(window.allow().is_allowed());
        let retry = window.allow().retry_after().unwrap();
        assert!(retry <= Duration::from_millis(100));
    }
}
