//! Reconnect backoff policy for the change feed.

use std::time::Duration;

/// Capped exponential backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedBackoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Reconnect attempts before surfacing `DisconnectedError`.
    pub max_attempts: u32,
}

impl Default for FeedBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: 5,
        }
    }
}

impl FeedBackoff {
    /// Delay before the given reconnect attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}
