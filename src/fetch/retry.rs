//! Exponential backoff schedule for the fetch engine
//!
//! Delays double per attempt, are capped at a maximum, and carry a random
//! jitter factor in [1.0, 2.0) so many workers hammering the same host do
//! not retry in lockstep. With this jitter shape consecutive delays stay
//! non-decreasing: the largest jittered delay for attempt n never exceeds
//! the smallest possible delay for attempt n+1.

use rand::Rng;
use std::time::Duration;

/// Backoff configuration shared by all requests of one engine
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay before the first retry
    pub base_delay: Duration,
    /// Cap applied to the exponential growth
    pub max_delay: Duration,
    /// Whether to jitter delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(self.max_delay);
        if self.jitter {
            add_jitter(capped)
        } else {
            capped
        }
    }
}

/// Multiply a delay by a uniform factor in [1.0, 2.0)
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..2.0);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
