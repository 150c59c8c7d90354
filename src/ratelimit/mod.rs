//! Failed-Attempt Rate Limiting
//!
//! Sliding-window limiter of failed attempts per key, and a login throttle
//! gating attempts on two independent axes (client IP and username).
//!
//! # Per-key state machine
//!
//! ```text
//!            failure (n < max)             failure (n >= max)
//!   Clean ─────────────────────▶ Accumulating ─────────────────▶ Blocked
//!     ▲                               │  window elapsed: n = 0      │
//!     │         success (any state)   │                             │ block elapsed
//!     └───────────────────────────────┴─────────────────────────────┘
//! ```

mod limiter;
mod throttle;

pub use limiter::SlidingWindowLimiter;
pub use throttle::LoginThrottle;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shortest cleaner interval
pub const MIN_CLEANUP_INTERVAL: Duration = Duration::from_millis(10);

/// Per-key failed-attempt limiter
pub trait RateLimiter: Send + Sync + 'static {
    /// Whether `key` currently has an unexpired block
    fn is_limited(&self, key: &str) -> bool;

    /// Record one attempt for `key`. Success clears all state for the key.
    fn record_attempt(&self, key: &str, success: bool);
}

/// Limiter thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Failures within one window that trigger a block
    pub max_failed_attempts: u32,

    /// Window over which failures are counted
    #[serde(with = "crate::config::duration_secs")]
    pub attempt_window: Duration,

    /// How long a key stays blocked
    #[serde(with = "crate::config::duration_secs")]
    pub block_duration: Duration,
}

impl RateLimitConfig {
    pub fn new(max_failed_attempts: u32, attempt_window: Duration, block_duration: Duration) -> Self {
        Self {
            max_failed_attempts,
            attempt_window,
            block_duration,
        }
    }

    /// Client IP axis: 10 failures per minute, 5 minute block
    pub fn for_ip() -> Self {
        Self::new(10, Duration::from_secs(60), Duration::from_secs(5 * 60))
    }

    /// Username axis: 5 failures per 5 minutes, 15 minute block
    pub fn for_username() -> Self {
        Self::new(5, Duration::from_secs(5 * 60), Duration::from_secs(15 * 60))
    }

    /// Half the shorter of window and block, floored at [`MIN_CLEANUP_INTERVAL`]
    pub fn cleanup_interval(&self) -> Duration {
        (self.attempt_window.min(self.block_duration) / 2).max(MIN_CLEANUP_INTERVAL)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_failed_attempts == 0 {
            return Err(Error::Config(
                "max_failed_attempts must be at least 1".to_string(),
            ));
        }
        if self.attempt_window.is_zero() {
            return Err(Error::Config("attempt_window must be non-zero".to_string()));
        }
        if self.block_duration.is_zero() {
            return Err(Error::Config("block_duration must be non-zero".to_string()));
        }
        Ok(())
    }
}
