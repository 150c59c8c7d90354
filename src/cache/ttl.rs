//! TTL Cache

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::entry::CacheItem;
use super::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::task::BackgroundTask;

/// Shortest accepted sweep interval
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Thread-safe string-keyed cache with per-entry expiration
#[derive(Debug)]
pub struct TtlCache<T> {
    items: RwLock<HashMap<String, CacheItem<T>>>,
    metrics: CacheMetrics,
}

impl<T> Default for TtlCache<T> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            metrics: CacheMetrics::new(),
        }
    }
}

impl<T> TtlCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace `key`. A zero `ttl` never expires.
    pub fn set(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let key = key.into();
        trace!(%key, ?ttl, "Cache set");
        self.items.write().insert(key, CacheItem::new(value, ttl));
        self.metrics.record_insert();
    }

    /// Look up `key`. An expired entry is evicted and reported as a miss.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        {
            let items = self.items.read();
            match items.get(key) {
                None => {
                    self.metrics.record_miss();
                    return None;
                }
                Some(item) if !item.is_expired_at(now) => {
                    self.metrics.record_hit();
                    return Some(item.value().clone());
                }
                Some(_) => {}
            }
        }

        // Expired: upgrade to the write lock and re-check, a concurrent set
        // may have replaced the entry in between.
        let mut items = self.items.write();
        if let Some(item) = items.get(key) {
            if !item.is_expired_at(Instant::now()) {
                self.metrics.record_hit();
                return Some(item.value().clone());
            }
            items.remove(key);
            self.metrics.record_expired(1);
            debug!(%key, "Evicted expired cache entry on lookup");
        }
        self.metrics.record_miss();
        None
    }

    /// Remove `key`; returns whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.items.write().remove(key).is_some()
    }

    /// Number of stored entries, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// Whether no entries are stored
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    /// Remove every entry
    pub fn clear(&self) {
        self.items.write().clear();
    }

    /// Evict all expired entries in one pass; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|_, item| !item.is_expired_at(now));
        let removed = before - items.len();
        drop(items);

        self.metrics.record_sweep();
        if removed > 0 {
            self.metrics.record_expired(removed as u64);
            debug!(removed, "Purged expired cache entries");
        }
        removed
    }

    /// Run [`purge_expired`](Self::purge_expired) every `interval` until
    /// `cancel` fires.
    pub async fn run_expiry_sweep(&self, cancel: CancellationToken, interval: Duration) {
        let period = interval.max(MIN_SWEEP_INTERVAL);
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(?period, "Cache expiry sweep started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cache expiry sweep stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.purge_expired();
                }
            }
        }
    }

    /// Spawn the expiry sweep as an owned background task
    pub fn spawn_expiry_sweep(self: &Arc<Self>, interval: Duration) -> BackgroundTask {
        let cache = Arc::clone(self);
        BackgroundTask::spawn("cache-expiry-sweep", move |cancel| async move {
            cache.run_expiry_sweep(cancel, interval).await;
        })
    }

    /// Live metrics collector
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Metrics snapshot
    pub fn stats(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }
}
