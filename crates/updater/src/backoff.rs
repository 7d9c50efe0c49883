//! Exponential backoff with jitter for publication retries

use rand::Rng;
use std::time::Duration;

use oracle_core::RetryConfig;

/// Delay sequence for one cycle's retries
///
/// Each delay is `base * 2^n` plus up to `jitter_ratio` of that again,
/// capped at `max`. Delays never decrease within a sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_ratio: f64,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base: config.base_delay(),
            max: config.max_delay(),
            jitter_ratio: config.jitter_ratio.clamp(0.0, 1.0),
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let exponential = self
            .base
            .saturating_mul(2u32.saturating_pow(self.attempt))
            .min(self.max);
        let jitter = exponential.mul_f64(rng.gen_range(0.0..=self.jitter_ratio));

        let delay = exponential.saturating_add(jitter).min(self.max).max(self.last);

        self.attempt = self.attempt.saturating_add(1);
        self.last = delay;
        delay
    }

    /// Number of delays handed out so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
