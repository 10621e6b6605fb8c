/// Retry budget and backoff for transient task failures
///
/// ```text
/// delay(attempt) = min(base * 2^(attempt-1), max) + jitter(0..=10% of that)
/// ```
///
/// `attempt` is the 1-based run number that just failed. With the default
/// budget of 2 retries an item gets 3 runs: delays of ~90 s and ~180 s sit
/// between them.

use rand::Rng;
use std::time::Duration;

/// Share of the delay added as random jitter
const JITTER_RATIO: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(2, Duration::from_secs(90), Duration::from_secs(900))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        RetryPolicy {
            max_retries,
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether a transient failure of run `attempt` gets another run
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_retries
    }

    /// Backoff before the run after `attempt`, without jitter
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff before the run after `attempt`, with jitter
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        let max_jitter_ms = (delay.as_millis() as f64 * JITTER_RATIO) as u64;
        if max_jitter_ms == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms);
        delay + Duration::from_millis(jitter)
    }
}
