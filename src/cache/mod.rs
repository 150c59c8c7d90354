//! Expiring Key-Value Cache
//!
//! String-keyed in-memory store whose entries expire after a per-entry TTL.
//!
//! # Expiry
//!
//! Expired entries are never served. They are removed in two ways:
//!
//! - lazily, by the `get` that finds them expired;
//! - eagerly, by a periodic sweep ([`TtlCache::run_expiry_sweep`] or the
//!   owned [`TtlCache::spawn_expiry_sweep`] task).
//!
//! All timing uses the monotonic Tokio clock.

mod entry;
mod metrics;
mod ttl;

pub use entry::CacheItem;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use ttl::TtlCache;

use std::time::Duration;

/// Default interval between expiry sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
