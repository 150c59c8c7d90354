//! Login Throttle
//!
//! Gates login attempts on client IP and username independently. Blocking on
//! either axis alone is bypassable, so both are checked and failures are
//! recorded against both.

use std::future::Future;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use super::{RateLimitConfig, RateLimiter, SlidingWindowLimiter};
use crate::error::{Error, Result};

/// Two-axis login throttle
#[derive(Debug)]
pub struct LoginThrottle<L: RateLimiter = SlidingWindowLimiter> {
    ip: Arc<L>,
    username: Arc<L>,
}

impl LoginThrottle<SlidingWindowLimiter> {
    /// Build both limiters from their configs
    pub fn new(ip: RateLimitConfig, username: RateLimitConfig) -> Self {
        Self {
            ip: SlidingWindowLimiter::new(ip),
            username: SlidingWindowLimiter::new(username),
        }
    }

    /// Throttle with the stock IP and username thresholds
    pub fn with_defaults() -> Self {
        Self::new(RateLimitConfig::for_ip(), RateLimitConfig::for_username())
    }

    /// Stop both cleaners
    pub async fn shutdown(&self) {
        tokio::join!(self.ip.shutdown(), self.username.shutdown());
        info!("Login throttle stopped");
    }
}

impl<L: RateLimiter> LoginThrottle<L> {
    /// Throttle over existing limiters
    pub fn with_limiters(ip: Arc<L>, username: Arc<L>) -> Self {
        Self { ip, username }
    }

    /// IP-keyed limiter
    pub fn ip_limiter(&self) -> &L {
        &self.ip
    }

    /// Username-keyed limiter
    pub fn username_limiter(&self) -> &L {
        &self.username
    }

    /// Refuse the attempt if either axis is blocked.
    ///
    /// When one axis refuses, a failure is recorded against the other so a
    /// blocked IP cannot keep probing usernames for free (and vice versa).
    /// The error does not say which axis triggered.
    #[instrument(skip(self))]
    pub fn check(&self, ip: &str, username: &str) -> Result<()> {
        if self.ip.is_limited(ip) {
            warn!("IP rate limited");
            self.username.record_attempt(username, false);
            return Err(Error::RateLimited);
        }

        if self.username.is_limited(username) {
            warn!("Username rate limited");
            self.ip.record_attempt(ip, false);
            return Err(Error::RateLimited);
        }

        Ok(())
    }

    /// Record the outcome of a credential check against both axes
    pub fn record(&self, ip: &str, username: &str, success: bool) {
        self.ip.record_attempt(ip, success);
        self.username.record_attempt(username, success);
    }

    /// Check, run `verify`, and record its outcome on both axes.
    ///
    /// Returns whether the credentials were accepted; a refused attempt
    /// never runs `verify`.
    pub async fn attempt<Fut>(&self, ip: &str, username: &str, verify: Fut) -> Result<bool>
    where
        Fut: Future<Output = bool>,
    {
        self.check(ip, username)?;

        let success = verify.await;
        self.record(ip, username, success);
        if !success {
            warn!(ip, username, "Invalid credentials");
        }
        Ok(success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn throttle() -> LoginThrottle {
        LoginThrottle::new(
            RateLimitConfig::new(3, Duration::from_secs(60), Duration::from_secs(300)),
            RateLimitConfig::new(2, Duration::from_secs(60), Duration::from_secs(300)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_username_axis_blocks_and_charges_ip() {
        let throttle = throttle();

        throttle.record("1.1.1.1", "alice", false);
        throttle.record("2.2.2.2", "alice", false);

        // A fresh IP is still refused: the username is blocked.
        assert_matches!(throttle.check("3.3.3.3", "alice"), Err(Error::RateLimited));
        assert_eq!(throttle.ip_limiter().failed_attempts("3.3.3.3"), 1);
        assert!(throttle.check("3.3.3.3", "bob").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ip_axis_blocks_and_charges_username() {
        let throttle = throttle();

        for user in ["a", "b", "c"] {
            throttle.record("9.9.9.9", user, false);
        }

        assert_matches!(throttle.check("9.9.9.9", "dave"), Err(Error::RateLimited));
        assert_eq!(throttle.username_limiter().failed_attempts("dave"), 1);
        assert!(throttle.check("8.8.8.8", "erin").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_clears_both_axes() {
        let throttle = throttle();
        throttle.record("1.1.1.1", "alice", false);

        assert!(throttle.attempt("1.1.1.1", "alice", async { true }).await.unwrap());
        assert_eq!(throttle.ip_limiter().failed_attempts("1.1.1.1"), 0);
        assert_eq!(throttle.username_limiter().failed_attempts("alice"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_attempt_skips_verification() {
        let throttle = throttle();
        throttle.record("1.1.1.1", "alice", false);
        throttle.record("1.1.1.1", "alice", false);

        let mut verified = false;
        let result = throttle
            .attempt("1.1.1.1", "alice", async {
                verified = true;
                true
            })
            .await;

        assert_matches!(result, Err(Error::RateLimited));
        assert!(!verified);
        assert_eq!(
            Error::RateLimited.public_message(),
            crate::error::TOO_MANY_ATTEMPTS_MESSAGE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_attempt_counts() {
        let throttle = throttle();
        assert!(!throttle.attempt("1.1.1.1", "alice", async { false }).await.unwrap());
        assert!(!throttle.attempt("1.1.1.1", "alice", async { false }).await.unwrap());
        assert!(throttle.check("1.1.1.1", "alice").is_err());

        throttle.shutdown().await;
    }
}
