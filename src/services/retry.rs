//! Exponential backoff with jitter for task retries.

use std::time::Duration;

/// Default base delay between attempts.
pub const DEFAULT_BASE_MS: u64 = 1000;

/// Default ceiling on the exponential delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Jittered exponential backoff: `min(base * 2^(attempt-1), max) +
/// uniform(0, delay/2)`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base_ms: u64,
    max_delay_ms: u64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BASE_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl Backoff {
    /// Creates a backoff with explicit base and ceiling.
    pub fn new(base_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_ms,
            max_delay_ms,
        }
    }

    /// Delay before retrying after the given failed attempt (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_ms
            .saturating_mul(1u64 << (attempt.saturating_sub(1)).min(32))
            .min(self.max_delay_ms);
        let jitter = fastrand::u64(0..=exp / 2);
        Duration::from_millis(exp + jitter)
    }
}
