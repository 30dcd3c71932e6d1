//! Retry pacing between forwarding attempts.

use std::time::Duration;

use rand::Rng;

/// Delay schedule for one request's attempt loop: exponential doubling
/// from a base, capped, with up to 10% jitter so correlated failures do
/// not retry in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    base: Duration,
    max: Duration,
}

impl RetryPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    pub fn from_millis(base_ms: u64, max_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
        )
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 is free.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        let capped = self.base.saturating_mul(factor).min(self.max);
        let jitter_cap = capped / 10;
        if jitter_cap.is_zero() {
            return capped;
        }
        capped + jitter_cap.mul_f64(rand::thread_rng().gen::<f64>())
    }
}
