//! Timer Abstractions
//!
//! The radio stack and scheduler run on a wrapping `u32` millisecond
//! clock. [`MillisClock`] derives it from the embassy time driver.

use embassy_time::{Duration, Instant, Timer};

/// Wrapping millisecond clock since boot
#[derive(Clone, Copy, Debug, Default)]
pub struct MillisClock;

impl MillisClock {
    /// Milliseconds since boot, wrapping after ~49 days
    #[must_use]
    pub fn now_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }

    /// Yield to the executor for one loop period
    pub async fn pace(&self, period_ms: u64) {
        Timer::after(Duration::from_millis(period_ms)).await;
    }
}

/// Rate limiter for periodic operations
pub struct RateLimiter {
    period: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    /// Create a rate limiter from period
    #[must_use]
    pub const fn new(period: Duration) -> Self {
        Self { period, last: None }
    }

    /// Create a rate limiter from a period in milliseconds
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    /// Check if enough time has passed (and update if so)
    pub fn check(&mut self) -> bool {
        let now = Instant::now();

        match self.last {
            None => {
                self.last = Some(now);
                true
            }
            Some(last) if now - last >= self.period => {
                self.last = Some(now);
                true
            }
            Some(_) => false,
        }
    }
}
