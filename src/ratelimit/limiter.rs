//! Sliding-Window Limiter

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{RateLimitConfig, RateLimiter};
use crate::task::BackgroundTask;

/// Failure bookkeeping for one key
#[derive(Debug, Clone, Copy)]
struct AttemptState {
    failed_attempts: u32,
    first_attempt: Instant,
    blocked_until: Option<Instant>,
}

impl AttemptState {
    fn new(now: Instant) -> Self {
        Self {
            failed_attempts: 0,
            first_attempt: now,
            blocked_until: None,
        }
    }

    fn is_blocked_at(&self, now: Instant) -> bool {
        matches!(self.blocked_until, Some(until) if now < until)
    }
}

/// In-memory limiter counting failed attempts per key inside a window.
///
/// A background cleaner drops keys whose window and block have both elapsed.
/// Must be created inside a Tokio runtime.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    config: RateLimitConfig,
    state: Mutex<HashMap<String, AttemptState>>,
    cleaner: Mutex<Option<BackgroundTask>>,
}

impl SlidingWindowLimiter {
    /// Create a limiter and start its cleaner
    pub fn new(config: RateLimitConfig) -> Arc<Self> {
        let limiter = Arc::new(Self {
            config,
            state: Mutex::new(HashMap::new()),
            cleaner: Mutex::new(None),
        });

        let interval = config.cleanup_interval();
        let weak = Arc::downgrade(&limiter);
        let task = BackgroundTask::spawn("rate-limit-cleaner", move |cancel| {
            run_cleaner(weak, cancel, interval)
        });
        *limiter.cleaner.lock() = Some(task);

        info!(
            max_failed_attempts = config.max_failed_attempts,
            window = ?config.attempt_window,
            block = ?config.block_duration,
            "Rate limiter started"
        );
        limiter
    }

    /// Thresholds in effect
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Keys currently holding state
    pub fn tracked_keys(&self) -> usize {
        self.state.lock().len()
    }

    /// Failures counted in the current window for `key`
    pub fn failed_attempts(&self, key: &str) -> u32 {
        self.state
            .lock()
            .get(key)
            .map(|s| s.failed_attempts)
            .unwrap_or(0)
    }

    /// Drop keys whose window has elapsed and that are not blocked; clear
    /// elapsed blocks. Returns the number of keys removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let window = self.config.attempt_window;

        let mut state = self.state.lock();
        let before = state.len();
        state.retain(|_, entry| {
            if !entry.is_blocked_at(now) {
                entry.blocked_until = None;
            }
            let window_open = now <= entry.first_attempt + window;
            window_open || entry.blocked_until.is_some()
        });
        let removed = before - state.len();
        drop(state);

        if removed > 0 {
            debug!(removed, "Rate limiter cleaned expired keys");
        }
        removed
    }

    /// Stop the cleaner and wait for it to exit
    pub async fn shutdown(&self) {
        let task = self.cleaner.lock().take();
        if let Some(task) = task {
            task.shutdown().await;
            info!("Rate limiter cleaner stopped");
        }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn is_limited(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut state = self.state.lock();
        let Some(entry) = state.get_mut(key) else {
            return false;
        };

        if entry.is_blocked_at(now) {
            return true;
        }
        // Lazily clear a block that has run out.
        if entry.blocked_until.take().is_some() {
            debug!(key, "Block expired");
        }
        false
    }

    fn record_attempt(&self, key: &str, success: bool) {
        let mut state = self.state.lock();

        if success {
            if state.remove(key).is_some() {
                debug!(key, "Successful attempt cleared limiter state");
            }
            return;
        }

        let now = Instant::now();
        let entry = state
            .entry(key.to_string())
            .or_insert_with(|| AttemptState::new(now));

        if entry.failed_attempts > 0 && now > entry.first_attempt + self.config.attempt_window {
            entry.failed_attempts = 0;
        }
        if entry.failed_attempts == 0 {
            entry.first_attempt = now;
        }

        entry.failed_attempts = entry.failed_attempts.saturating_add(1);

        if entry.failed_attempts >= self.config.max_failed_attempts {
            entry.blocked_until = Some(now + self.config.block_duration);
            warn!(
                key,
                failed_attempts = entry.failed_attempts,
                block = ?self.config.block_duration,
                "Key blocked after repeated failures"
            );
        } else {
            debug!(key, failed_attempts = entry.failed_attempts, "Failed attempt recorded");
        }
    }
}

impl<L: RateLimiter + ?Sized> RateLimiter for Arc<L> {
    fn is_limited(&self, key: &str) -> bool {
        (**self).is_limited(key)
    }

    fn record_attempt(&self, key: &str, success: bool) {
        (**self).record_attempt(key, success)
    }
}

async fn run_cleaner(
    limiter: Weak<SlidingWindowLimiter>,
    cancel: tokio_util::sync::CancellationToken,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                limiter.cleanup_expired();
            }
        }
    }
    debug!("Rate limiter cleaner exiting");
}
