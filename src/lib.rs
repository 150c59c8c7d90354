//! Searchgate - Bounded Concurrent Request Throttling
//!
//! The throttling core of a document-search web application: calls to a slow,
//! externally rate-limited search service are bounded by a worker-pool job
//! queue and short-circuited by a TTL result cache, while login attempts are
//! gated by a sliding-window failed-attempt limiter.
//!
//! # Architecture
//!
//! ```text
//! caller ─▶ QueryExecutor ─▶ TtlCache ──hit──▶ SearchPage
//!                 │ miss
//!                 ▼
//!             JobQueue ─▶ worker ─▶ SearchBackend
//!
//! login ─▶ LoginThrottle ─▶ SlidingWindowLimiter (ip) + SlidingWindowLimiter (username)
//! ```
//!
//! # Modules
//!
//! - [`queue`] - Generic bounded worker-pool job queue
//! - [`cache`] - Expiring key-value cache
//! - [`search`] - Query executor, search types, backend port and adapters
//! - [`ratelimit`] - Failed-attempt rate limiting and the login throttle
//! - [`config`] - Gateway configuration
//! - [`metrics`] - Prometheus metrics and health endpoint
//! - [`task`] - Owned background loops
//! - [`error`] - Error types

pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod ratelimit;
pub mod search;
pub mod task;

// Re-export commonly used types
pub use cache::TtlCache;
pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use queue::{JobQueue, QueueConfig};
pub use ratelimit::{LoginThrottle, RateLimitConfig, RateLimiter, SlidingWindowLimiter};
pub use search::{
    ExecutorConfig, InMemoryBackend, QueryExecutor, SearchBackend, SearchPage, SearchQuery,
};
