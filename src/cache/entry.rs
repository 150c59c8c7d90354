//! Cache Entry Types

use std::time::Duration;

use tokio::time::Instant;

/// A cached value with an optional expiration instant
#[derive(Debug, Clone)]
pub struct CacheItem<T> {
    /// The cached value
    value: T,
    /// When the value stops being served; `None` never expires
    expires_at: Option<Instant>,
    /// When the value was stored
    stored_at: Instant,
}

impl<T> CacheItem<T> {
    /// Create an item expiring `ttl` from now. A zero `ttl` never expires.
    pub fn new(value: T, ttl: Duration) -> Self {
        let now = Instant::now();
        let expires_at = if ttl.is_zero() {
            None
        } else {
            now.checked_add(ttl)
        };

        Self {
            value,
            expires_at,
            stored_at: now,
        }
    }

    /// Borrow the value
    #[inline]
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Take the value
    pub fn into_value(self) -> T {
        self.value
    }

    /// Expiration instant, if any
    #[inline]
    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Time since the value was stored
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }

    /// Expired iff `now` is strictly past the expiration instant
    #[inline]
    pub fn is_expired_at(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now > at)
    }

    /// Expired as of the current instant
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_item_expires_after_ttl() {
        let item = CacheItem::new("v", Duration::from_millis(100));
        assert!(!item.is_expired());
        assert!(item.expires_at().is_some());

        tokio::time::advance(Duration::from_millis(100)).await;
        // Boundary is exclusive.
        assert!(!item.is_expired());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(item.is_expired());
        assert_eq!(item.age(), Duration::from_millis(101));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ttl_never_expires() {
        let item = CacheItem::new(5u32, Duration::ZERO);
        assert!(item.expires_at().is_none());

        tokio::time::advance(Duration::from_secs(86_400 * 365)).await;
        assert!(!item.is_expired());
        assert_eq!(*item.value(), 5);
        assert_eq!(item.into_value(), 5);
    }
}
