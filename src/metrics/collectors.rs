//! Custom metric collectors for outpost operations.
//!
//! This module provides a high-level interface for recording various metrics
//! throughout the application. The `MetricsCollector` struct wraps the raw
//! Prometheus metrics and provides convenient methods for common operations.

use super::prometheus::{
    BREAKER_STATE, BREAKER_TRANSITIONS, DELIVERIES_TOTAL, DELIVERY_DURATION, JOB_DURATION,
    JOB_RUNS_TOTAL, POOL_RECYCLES, POOL_SLOTS, POOL_WAITERS, QUEUE_DEPTH, RATE_WINDOW_USED,
    RECONCILED_TOTAL, VERIFICATIONS_TOTAL,
};

/// Metrics collector for recording outpost operational metrics.
///
/// Provides a convenient interface for recording metrics throughout the
/// application. Every method is a no-op until `init_metrics()` has run,
/// so library code can record unconditionally.
///
/// # Example
///
/// ```ignore
/// use outpost::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.record_delivery("single", "posted", 12.4);
/// collector.update_queue_depth("queued", 3);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    /// Create a new MetricsCollector instance.
    ///
    /// Note: Metrics must be initialized with `init_metrics()` before
    /// recorded values become visible.
    pub fn new() -> Self {
        Self
    }

    /// Record a settled delivery attempt.
    ///
    /// # Arguments
    ///
    /// * `kind` - Decision kind ("single", "thread", "reply")
    /// * `outcome` - Attempt outcome (e.g., "posted", "requeued", "failed",
    ///   "duplicate")
    /// * `duration_secs` - Attempt duration in seconds
    pub fn record_delivery(&self, kind: &str, outcome: &str, duration_secs: f64) {
        if let Some(deliveries) = DELIVERIES_TOTAL.get() {
            deliveries.with_label_values(&[kind, outcome]).inc();
        }

        if let Some(duration) = DELIVERY_DURATION.get() {
            duration.with_label_values(&[kind]).observe(duration_secs);
        }

        tracing::trace!(
            kind = kind,
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded delivery metric"
        );
    }

    /// Record a verification lookup result ("found", "missing", "error").
    pub fn record_verification(&self, result: &str) {
        if let Some(verifications) = VERIFICATIONS_TOTAL.get() {
            verifications.with_label_values(&[result]).inc();
        }

        tracing::trace!(result = result, "Recorded verification metric");
    }

    /// Update the breaker state gauge with its numeric code.
    pub fn update_breaker_state(&self, state_code: u8) {
        if let Some(state) = BREAKER_STATE.get() {
            state.set(state_code as f64);
        }
    }

    /// Record a breaker transition into the named state.
    pub fn record_breaker_transition(&self, to: &str) {
        if let Some(transitions) = BREAKER_TRANSITIONS.get() {
            transitions.with_label_values(&[to]).inc();
        }

        tracing::trace!(to = to, "Recorded breaker transition");
    }

    /// Update the sliding-window usage gauge for an operation class.
    pub fn update_rate_usage(&self, class: &str, used: usize) {
        if let Some(usage) = RATE_WINDOW_USED.get() {
            usage.with_label_values(&[class]).set(used as f64);
        }
    }

    /// Update the pool slot gauges from a point-in-time occupancy reading.
    pub fn update_pool(&self, busy: usize, idle: usize, vacant: usize, waiting: usize) {
        if let Some(slots) = POOL_SLOTS.get() {
            slots.with_label_values(&["busy"]).set(busy as f64);
            slots.with_label_values(&["idle"]).set(idle as f64);
            slots.with_label_values(&["vacant"]).set(vacant as f64);
        }

        if let Some(waiters) = POOL_WAITERS.get() {
            waiters.set(waiting as f64);
        }
    }

    /// Record a recycled browser session ("overdue", "unhealthy",
    /// "requested").
    pub fn record_pool_recycle(&self, reason: &str) {
        if let Some(recycles) = POOL_RECYCLES.get() {
            recycles.with_label_values(&[reason]).inc();
        }

        tracing::trace!(reason = reason, "Recorded pool recycle");
    }

    /// Record a scheduled job run.
    ///
    /// # Arguments
    ///
    /// * `job` - Job name
    /// * `outcome` - Run outcome ("success", "failure", "skipped", "panic")
    /// * `duration_secs` - Run duration in seconds
    pub fn record_job_run(&self, job: &str, outcome: &str, duration_secs: f64) {
        if let Some(runs) = JOB_RUNS_TOTAL.get() {
            runs.with_label_values(&[job, outcome]).inc();
        }

        if let Some(duration) = JOB_DURATION.get() {
            duration.with_label_values(&[job]).observe(duration_secs);
        }

        tracing::trace!(
            job = job,
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded job run metric"
        );
    }

    /// Update the decision count gauge for a status.
    pub fn update_queue_depth(&self, status: &str, depth: u64) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth.with_label_values(&[status]).set(depth as f64);
        }

        tracing::trace!(status = status, depth = depth, "Updated queue depth metric");
    }

    /// Record a decision corrected from failed to posted.
    pub fn record_reconciled(&self) {
        if let Some(reconciled) = RECONCILED_TOTAL.get() {
            reconciled.inc();
        }
    }
}
