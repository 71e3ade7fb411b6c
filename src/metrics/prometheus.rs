//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics exposed by outpost and
//! provides functions for initializing, registering, and exporting them.

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all outpost metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total delivery attempts settled, labeled by decision kind and outcome.
pub static DELIVERIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Delivery attempt duration in seconds, labeled by decision kind.
pub static DELIVERY_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Verification lookups after ambiguous outcomes, labeled by result.
pub static VERIFICATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Current breaker state code (0 closed, 1 open, 2 half-open).
pub static BREAKER_STATE: OnceLock<Gauge> = OnceLock::new();

/// Breaker state transitions, labeled by the state entered.
pub static BREAKER_TRANSITIONS: OnceLock<CounterVec> = OnceLock::new();

/// Sliding-window usage per operation class.
pub static RATE_WINDOW_USED: OnceLock<GaugeVec> = OnceLock::new();

/// Browser pool slots by state.
pub static POOL_SLOTS: OnceLock<GaugeVec> = OnceLock::new();

/// Leases queued waiting for a browser slot.
pub static POOL_WAITERS: OnceLock<Gauge> = OnceLock::new();

/// Browser sessions recycled, labeled by reason.
pub static POOL_RECYCLES: OnceLock<CounterVec> = OnceLock::new();

/// Scheduled job runs, labeled by job name and outcome.
pub static JOB_RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Scheduled job run duration in seconds, labeled by job name.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Decision counts by status.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Decisions corrected from failed to posted by reconciliation.
pub static RECONCILED_TOTAL: OnceLock<Counter> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// This function should be called once at application startup. Calling it
/// again is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically
/// due to duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let deliveries_total = CounterVec::new(
        Opts::new("outpost_deliveries_total", "Delivery attempts settled"),
        &["kind", "outcome"],
    )?;

    let delivery_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "outpost_delivery_duration_seconds",
            "Delivery attempt duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 10.0, 20.0, 30.0, 45.0, 60.0, 120.0]),
        &["kind"],
    )?;

    let verifications_total = CounterVec::new(
        Opts::new(
            "outpost_verifications_total",
            "Verification lookups after ambiguous outcomes",
        ),
        &["result"],
    )?;

    let breaker_state = Gauge::new(
        "outpost_breaker_state",
        "Delivery breaker state code (0 closed, 1 open, 2 half-open)",
    )?;

    let breaker_transitions = CounterVec::new(
        Opts::new(
            "outpost_breaker_transitions_total",
            "Breaker state transitions",
        ),
        &["to"],
    )?;

    let rate_window_used = GaugeVec::new(
        Opts::new(
            "outpost_rate_window_used",
            "Operations recorded in the current sliding window",
        ),
        &["class"],
    )?;

    let pool_slots = GaugeVec::new(
        Opts::new("outpost_pool_slots", "Browser pool slots by state"),
        &["state"],
    )?;

    let pool_waiters = Gauge::new(
        "outpost_pool_waiters",
        "Leases queued waiting for a browser slot",
    )?;

    let pool_recycles = CounterVec::new(
        Opts::new("outpost_pool_recycles_total", "Browser sessions recycled"),
        &["reason"],
    )?;

    let job_runs_total = CounterVec::new(
        Opts::new("outpost_job_runs_total", "Scheduled job runs"),
        &["job", "outcome"],
    )?;

    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "outpost_job_duration_seconds",
            "Scheduled job run duration in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["job"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("outpost_queue_depth", "Decision counts by status"),
        &["status"],
    )?;

    let reconciled_total = Counter::new(
        "outpost_reconciled_total",
        "Decisions corrected from failed to posted by reconciliation",
    )?;

    registry.register(Box::new(deliveries_total.clone()))?;
    registry.register(Box::new(delivery_duration.clone()))?;
    registry.register(Box::new(verifications_total.clone()))?;
    registry.register(Box::new(breaker_state.clone()))?;
    registry.register(Box::new(breaker_transitions.clone()))?;
    registry.register(Box::new(rate_window_used.clone()))?;
    registry.register(Box::new(pool_slots.clone()))?;
    registry.register(Box::new(pool_waiters.clone()))?;
    registry.register(Box::new(pool_recycles.clone()))?;
    registry.register(Box::new(job_runs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(reconciled_total.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = DELIVERIES_TOTAL.set(deliveries_total);
    let _ = DELIVERY_DURATION.set(delivery_duration);
    let _ = VERIFICATIONS_TOTAL.set(verifications_total);
    let _ = BREAKER_STATE.set(breaker_state);
    let _ = BREAKER_TRANSITIONS.set(breaker_transitions);
    let _ = RATE_WINDOW_USED.set(rate_window_used);
    let _ = POOL_SLOTS.set(pool_slots);
    let _ = POOL_WAITERS.set(pool_waiters);
    let _ = POOL_RECYCLES.set(pool_recycles);
    let _ = JOB_RUNS_TOTAL.set(job_runs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = RECONCILED_TOTAL.set(reconciled_total);

    tracing::info!("Prometheus metrics initialized");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Gathers all metrics from the registry and encodes them in the text
/// exposition format, suitable for scraping or the `status --metrics`
/// command.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
