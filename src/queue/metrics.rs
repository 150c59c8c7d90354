//! Queue Metrics Collection

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Queue metrics collector
#[derive(Debug, Default)]
pub struct QueueMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    rejected: AtomicU64,
    panicked: AtomicU64,

    // Gauges
    queued: AtomicU64,
    in_flight: AtomicU64,
}

impl QueueMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Undo [`record_submitted`](Self::record_submitted) for a job that never
    /// reached the channel
    pub fn record_unsubmitted(&self) {
        for counter in [&self.submitted, &self.queued] {
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
        }
    }

    pub fn record_dequeued(&self) {
        let _ = self
            .queued
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn record_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_finished(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(1))
            });
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    pub fn queued(&self) -> u64 {
        self.queued.load(Ordering::Relaxed)
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            submitted: self.submitted(),
            completed: self.completed(),
            cancelled: self.cancelled(),
            rejected: self.rejected(),
            panicked: self.panicked(),
            queued: self.queued(),
            in_flight: self.in_flight(),
        }
    }
}

/// Serializable view of [`QueueMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueMetricsSnapshot {
    pub submitted: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub rejected: u64,
    pub panicked: u64,
    pub queued: u64,
    pub in_flight: u64,
}
