//! Bounded Worker-Pool Job Queue
//!
//! A generic executor that runs a caller-supplied processor on a fixed pool of
//! workers and hands each caller its own result.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  admission   ┌────────────────────┐   recv   ┌──────────┐
//! │  enqueue()   │─────────────▶│  job channel       │─────────▶│ worker 0 │──┐
//! │  (caller)    │  semaphore   │  (shared receiver) │─────────▶│ worker 1 │──┤
//! └──────▲───────┘  W+B permits └────────────────────┘─────────▶│ worker N │──┤
//!        │                                                      └──────────┘  │
//!        └──────────────────── one-shot reply ◀──────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - At most `worker_count` jobs run concurrently.
//! - At most `buffer_size` accepted jobs wait for a worker; further submitters
//!   are suspended (backpressure) until a slot frees, they cancel, or the
//!   queue stops.
//! - A job is processed by at most one worker and its result is delivered at
//!   most once.
//! - A panicking processor never takes its worker down; the waiting caller
//!   receives [`Error::JobAbandoned`](crate::error::Error::JobAbandoned).

mod job;
mod metrics;
mod pool;

pub use job::Job;
pub use metrics::{QueueMetrics, QueueMetricsSnapshot};
pub use pool::JobQueue;

use serde::{Deserialize, Serialize};

/// Default number of workers
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Default number of jobs allowed to wait for a worker
pub const DEFAULT_BUFFER_SIZE: usize = 4;

/// Job queue configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of long-lived workers (clamped to at least 1)
    pub worker_count: usize,

    /// Jobs allowed to wait for a worker (0 = synchronous handoff)
    pub buffer_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl QueueConfig {
    /// Create a config with the given sizes
    pub fn new(worker_count: usize, buffer_size: usize) -> Self {
        Self {
            worker_count,
            buffer_size,
        }
    }

    /// Config with `worker_count` clamped to at least one
    pub fn normalized(self) -> Self {
        Self {
            worker_count: self.worker_count.max(1),
            buffer_size: self.buffer_size,
        }
    }

    /// Maximum number of accepted, unfinished jobs
    pub fn capacity(&self) -> usize {
        let normalized = self.normalized();
        normalized.worker_count + normalized.buffer_size
    }
}
