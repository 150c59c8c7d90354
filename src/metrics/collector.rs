//! Prometheus Collector
//!
//! Gauges mirror the atomic snapshots each component keeps; they are
//! refreshed periodically rather than updated on every event.

use once_cell::sync::OnceCell;
use prometheus::{Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::cache::CacheMetricsSnapshot;
use crate::error::{Error, Result};
use crate::queue::QueueMetricsSnapshot;

const NAMESPACE: &str = "searchgate";

static GLOBAL: OnceCell<GatewayMetrics> = OnceCell::new();

fn metrics_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("Prometheus registration failed: {}", e))
}

/// Process-wide metric set backed by its own registry
#[derive(Clone)]
pub struct GatewayMetrics {
    registry: Registry,
    queue_jobs: IntGaugeVec,
    queue_depth: IntGaugeVec,
    cache_events: IntGaugeVec,
    cache_entries: IntGauge,
    cache_hit_ratio: Gauge,
    limiter_keys: IntGaugeVec,
    queries: IntCounterVec,
    login_rejections: IntCounter,
}

impl GatewayMetrics {
    /// Create and register every metric in a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let queue_jobs = IntGaugeVec::new(
            Opts::new("queue_jobs", "Jobs seen by a job queue, by outcome").namespace(NAMESPACE),
            &["queue", "outcome"],
        )
        .map_err(metrics_err)?;
        let queue_depth = IntGaugeVec::new(
            Opts::new("queue_depth", "Jobs currently waiting or running").namespace(NAMESPACE),
            &["queue", "state"],
        )
        .map_err(metrics_err)?;
        let cache_events = IntGaugeVec::new(
            Opts::new("cache_events", "Result cache events by kind").namespace(NAMESPACE),
            &["event"],
        )
        .map_err(metrics_err)?;
        let cache_entries = IntGauge::with_opts(
            Opts::new("cache_entries", "Entries currently cached").namespace(NAMESPACE),
        )
        .map_err(metrics_err)?;
        let cache_hit_ratio = Gauge::with_opts(
            Opts::new("cache_hit_ratio", "Result cache hit ratio").namespace(NAMESPACE),
        )
        .map_err(metrics_err)?;
        let limiter_keys = IntGaugeVec::new(
            Opts::new("rate_limiter_tracked_keys", "Keys holding rate limiter state")
                .namespace(NAMESPACE),
            &["axis"],
        )
        .map_err(metrics_err)?;
        let queries = IntCounterVec::new(
            Opts::new("queries_total", "Search queries answered, by result").namespace(NAMESPACE),
            &["result"],
        )
        .map_err(metrics_err)?;
        let login_rejections = IntCounter::with_opts(
            Opts::new("login_rejections_total", "Login attempts refused by the throttle")
                .namespace(NAMESPACE),
        )
        .map_err(metrics_err)?;

        registry.register(Box::new(queue_jobs.clone())).map_err(metrics_err)?;
        registry.register(Box::new(queue_depth.clone())).map_err(metrics_err)?;
        registry.register(Box::new(cache_events.clone())).map_err(metrics_err)?;
        registry.register(Box::new(cache_entries.clone())).map_err(metrics_err)?;
        registry.register(Box::new(cache_hit_ratio.clone())).map_err(metrics_err)?;
        registry.register(Box::new(limiter_keys.clone())).map_err(metrics_err)?;
        registry.register(Box::new(queries.clone())).map_err(metrics_err)?;
        registry.register(Box::new(login_rejections.clone())).map_err(metrics_err)?;

        Ok(Self {
            registry,
            queue_jobs,
            queue_depth,
            cache_events,
            cache_entries,
            cache_hit_ratio,
            limiter_keys,
            queries,
            login_rejections,
        })
    }

    /// Shared instance, created on first use
    pub fn global() -> Result<&'static Self> {
        GLOBAL.get_or_try_init(Self::new)
    }

    /// Mirror a job queue snapshot under the `queue` label
    pub fn observe_queue(&self, queue: &str, snap: &QueueMetricsSnapshot) {
        for (outcome, value) in [
            ("submitted", snap.submitted),
            ("completed", snap.completed),
            ("cancelled", snap.cancelled),
            ("rejected", snap.rejected),
            ("panicked", snap.panicked),
        ] {
            self.queue_jobs
                .with_label_values(&[queue, outcome])
                .set(value as i64);
        }
        self.queue_depth
            .with_label_values(&[queue, "queued"])
            .set(snap.queued as i64);
        self.queue_depth
            .with_label_values(&[queue, "in_flight"])
            .set(snap.in_flight as i64);
    }

    /// Mirror the result cache snapshot
    pub fn observe_cache(&self, entries: usize, snap: &CacheMetricsSnapshot) {
        for (event, value) in [
            ("hit", snap.hits),
            ("miss", snap.misses),
            ("insert", snap.inserts),
            ("expired", snap.expired_evictions),
            ("sweep", snap.sweeps),
        ] {
            self.cache_events.with_label_values(&[event]).set(value as i64);
        }
        self.cache_entries.set(entries as i64);
        self.cache_hit_ratio.set(snap.hit_ratio);
    }

    /// Record how many keys a limiter tracks
    pub fn observe_limiter(&self, axis: &str, tracked_keys: usize) {
        self.limiter_keys
            .with_label_values(&[axis])
            .set(tracked_keys as i64);
    }

    pub fn record_query(&self, ok: bool) {
        let result = if ok { "ok" } else { "error" };
        self.queries.with_label_values(&[result]).inc();
    }

    pub fn record_login_rejection(&self) {
        self.login_rejections.inc();
    }

    /// Prometheus text exposition of every metric
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| Error::Internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| Error::Internal(format!("Metrics output is not UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for GatewayMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayMetrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_encode() {
        let metrics = GatewayMetrics::new().unwrap();

        let queue = QueueMetricsSnapshot {
            submitted: 5,
            completed: 4,
            in_flight: 1,
            ..Default::default()
        };
        metrics.observe_queue("query", &queue);
        metrics.observe_cache(
            3,
            &CacheMetricsSnapshot {
                hits: 2,
                misses: 2,
                hit_ratio: 0.5,
                ..Default::default()
            },
        );
        metrics.observe_limiter("ip", 7);
        metrics.record_query(true);
        metrics.record_query(false);
        metrics.record_login_rejection();

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"searchgate_queue_jobs{outcome="submitted",queue="query"} 5"#));
        assert!(text.contains(r#"searchgate_queue_depth{queue="query",state="in_flight"} 1"#));
        assert!(text.contains("searchgate_cache_entries 3"));
        assert!(text.contains("searchgate_cache_hit_ratio 0.5"));
        assert!(text.contains(r#"searchgate_rate_limiter_tracked_keys{axis="ip"} 7"#));
        assert!(text.contains(r#"searchgate_queries_total{result="error"} 1"#));
        assert!(text.contains("searchgate_login_rejections_total 1"));
    }

    #[test]
    fn test_independent_registries() {
        let a = GatewayMetrics::new().unwrap();
        let b = GatewayMetrics::new().unwrap();
        a.record_login_rejection();
        assert!(b.encode().unwrap().contains("searchgate_login_rejections_total 0"));
    }

    #[test]
    fn test_global_is_shared() {
        let a = GatewayMetrics::global().unwrap();
        let b = GatewayMetrics::global().unwrap();
        assert!(std::ptr::eq(a, b));
    }
}
