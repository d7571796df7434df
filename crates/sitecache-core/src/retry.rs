//! Bounded exponential backoff shared by the broker and upstream clients.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many times to try a request and how long to wait in between.
///
/// `max_attempts` counts the first try, so `max_attempts = 3` means one
/// initial request and at most two retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
        }
    }

    /// Policy with no waiting between attempts, for tests.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0, 0)
    }

    /// Delay before retry number `retry` (1-based): base, 2x base, 4x base, ... capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Clamp a server-supplied delay (e.g. `Retry-After`) to this policy's cap.
    pub fn clamp(&self, requested: Duration) -> Duration {
        requested.min(Duration::from_millis(self.max_delay_ms))
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows_another(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
