//! Metrics module for Prometheus-based monitoring.
//!
//! This module provides metrics collection and export for outpost
//! operations: deliveries, breaker transitions, pool occupancy, rate
//! window usage, and scheduled job runs.
//!
//! # Example
//!
//! ```ignore
//! use outpost::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! // Initialize metrics on startup
//! init_metrics().expect("Failed to initialize metrics");
//!
//! // Create a collector for recording metrics
//! let collector = MetricsCollector::new();
//!
//! // Record a settled delivery
//! collector.record_delivery("single", "posted", 12.4);
//!
//! // Export metrics for scraping
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

// Re-export key types for convenient access
pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

// Re-export metric constants for direct access when needed
pub use prometheus::{
    BREAKER_STATE, BREAKER_TRANSITIONS, DELIVERIES_TOTAL, DELIVERY_DURATION, JOB_DURATION,
    JOB_RUNS_TOTAL, POOL_RECYCLES, POOL_SLOTS, POOL_WAITERS, QUEUE_DEPTH, RATE_WINDOW_USED,
    RECONCILED_TOTAL, REGISTRY, VERIFICATIONS_TOTAL,
};
