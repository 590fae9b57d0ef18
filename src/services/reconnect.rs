//! Reconnect backoff for the notification socket.
//!
//! Delay for retry `n` (0-based) is `base_delay * 2^n`, capped at `max_delay`,
//! optionally randomized by `jitter`.

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of retries per connection cycle.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Randomization factor in `[0, 1]`; `0` gives exact doubling.
    pub jitter: f64,
}

impl ReconnectPolicy {
    pub fn new(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter.clamp(0.0, 1.0),
        }
    }

    /// Whether another retry may be scheduled after `retries` have been used.
    pub fn can_retry(&self, retries: u32) -> bool {
        retries < self.max_attempts
    }

    /// Deterministic backoff for retry `retry` (0-based), before jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let cap = self.max_delay.as_millis() as u64;

        // Compute delay = min(max_delay, base * 2^retry)
        let mut delay = base;
        for _ in 0..retry {
            delay = delay.saturating_mul(2);
            if delay >= cap {
                delay = cap;
                break;
            }
        }
        Duration::from_millis(delay.min(cap))
    }

    /// Backoff for retry `retry` with jitter applied.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let delay = self.backoff(retry);
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        delay.mul_f64(factor).min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}
