//! Monotonic millisecond clock and the single tick-sleep suspension point.

use std::time::{Duration, Instant};

/// Millisecond tick source.
///
/// `now_ms` wraps around at `u32::MAX` the way a board tick counter does;
/// always measure intervals with [`elapsed_ms`], never with plain subtraction.
pub trait Clock {
    fn now_ms(&self) -> u32;
    /// Block the calling loop for `ms` milliseconds.
    fn sleep_ms(&self, ms: u32);
}

/// Milliseconds from `since` to `now`, correct across counter wraparound.
pub fn elapsed_ms(since: u32, now: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Clock backed by [`Instant`], truncated to a wrapping 32-bit counter.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // Truncation is the wraparound.
        self.origin.elapsed().as_millis() as u32
    }

    fn sleep_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}
