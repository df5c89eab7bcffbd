//! Tiered retry intervals.
//!
//! The host may take a long time to boot, so the reconnect interval slows
//! down the longer the controller stays unreachable:
//!
//! | attempt        | tier      |
//! |----------------|-----------|
//! | `< 51`         | fast      |
//! | `51 ..< 500`   | slow      |
//! | `>= 500`       | very slow |

use std::time::Duration;

/// First attempt that uses the slow interval.
pub const SLOW_TIER_START: u32 = 51;

/// First attempt that uses the very slow interval.
pub const VERY_SLOW_TIER_START: u32 = 500;

/// Default fast retry interval.
pub const DEFAULT_FAST_INTERVAL: Duration = Duration::from_millis(500);

/// Default slow retry interval.
pub const DEFAULT_SLOW_INTERVAL: Duration = Duration::from_secs(5);

/// Default very slow retry interval.
pub const DEFAULT_VERY_SLOW_INTERVAL: Duration = Duration::from_secs(30);

/// Backoff tier selected by attempt count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTier {
    /// Attempts 0 through 50.
    Fast,
    /// Attempts 51 through 499.
    Slow,
    /// Attempts 500 and above.
    VerySlow,
}

impl RetryTier {
    /// Tier for an attempt count.
    pub fn for_attempt(attempt: u32) -> Self {
        match attempt {
            a if a < SLOW_TIER_START => RetryTier::Fast,
            a if a < VERY_SLOW_TIER_START => RetryTier::Slow,
            _ => RetryTier::VerySlow,
        }
    }
}

/// Interval per tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Interval for the fast tier.
    pub fast: Duration,
    /// Interval for the slow tier.
    pub slow: Duration,
    /// Interval for the very slow tier.
    pub very_slow: Duration,
}

impl RetryPolicy {
    /// Create a policy with explicit intervals.
    pub fn new(fast: Duration, slow: Duration, very_slow: Duration) -> Self {
        Self {
            fast,
            slow,
            very_slow,
        }
    }

    /// Tier for an attempt count.
    #[inline]
    pub fn tier(&self, attempt: u32) -> RetryTier {
        RetryTier::for_attempt(attempt)
    }

    /// Sleep before the next attempt, given the failed attempt count.
    pub fn interval(&self, attempt: u32) -> Duration {
        match self.tier(attempt) {
            RetryTier::Fast => self.fast,
            RetryTier::Slow => self.slow,
            RetryTier::VerySlow => self.very_slow,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_FAST_INTERVAL,
            DEFAULT_SLOW_INTERVAL,
            DEFAULT_VERY_SLOW_INTERVAL,
        )
    }
}
