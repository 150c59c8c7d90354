//! Metrics module
//!
//! Prometheus exposition of queue, cache and rate limiter state, plus the
//! HTTP endpoint serving it alongside health probes.

mod collector;
mod server;

pub use collector::GatewayMetrics;
pub use server::{bind, serve, HealthState};
