//! Exponential backoff schedule

use std::time::Duration;

/// Delay schedule for retrying transient failures.
///
/// The first retry waits `base`, and every following retry doubles the
/// previous delay: `base, 2*base, 4*base, ...`, optionally capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    max: Option<Duration>,
}

impl BackoffPolicy {
    /// Doubling schedule starting at `base`, uncapped.
    pub fn exponential(base: Duration) -> Self {
        Self { base, max: None }
    }

    /// Cap every delay at `max`.
    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    /// Delay before the `retry`-th retry (1-based). `retry == 0` yields zero.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor);

        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1))
    }
}
