//! Operational status reporting.
//!
//! Assembles a point-in-time view of the system from persisted state
//! alone, so `outpost status` works from any host with database access
//! while the daemon keeps running elsewhere.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::breaker::{BreakerState, DELIVERY_BREAKER};
use crate::config::OutpostConfig;
use crate::limiter::{OpClass, RateLimiter, RateUsage};
use crate::metrics::MetricsCollector;
use crate::store::{BreakerRecord, DecisionCounts, DecisionStatus, JobHeartbeat, Store, StoreError};
use crate::utils::time::to_chrono;

/// Snapshot of queue, job, breaker and rate-window state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// When the snapshot was taken.
    pub generated_at: DateTime<Utc>,
    /// Whether the config points at a live platform.
    pub live: bool,
    /// Decisions per lifecycle state.
    pub decisions: DecisionCounts,
    /// Last persisted heartbeat per scheduled job.
    pub jobs: Vec<JobHeartbeat>,
    /// Persisted delivery breaker record, if one exists yet.
    pub breaker: Option<BreakerRecord>,
    /// Sliding-window usage per operation class.
    pub rates: Vec<RateUsage>,
}

impl StatusReport {
    /// Builds a report from persisted state.
    ///
    /// Rate usage is reconstructed by hydrating a throwaway limiter from
    /// the persisted events, the same way the daemon does at startup.
    ///
    /// # Errors
    ///
    /// Returns the first store error encountered.
    pub async fn gather(store: &dyn Store, config: &OutpostConfig) -> Result<Self, StoreError> {
        let now = Utc::now();

        let decisions = store.status_counts().await?;
        let mut jobs = store.load_heartbeats().await?;
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        let breaker = store.load_breaker(DELIVERY_BREAKER).await?;

        let limiter = RateLimiter::from_config(config);
        let since = now - to_chrono(limiter.max_window());
        for class in OpClass::all() {
            let events = store.load_rate_events(*class, since).await?;
            limiter.hydrate(*class, events);
        }
        let rates = limiter.usage_all(now);

        Ok(Self {
            generated_at: now,
            live: config.live,
            decisions,
            jobs,
            breaker,
            rates,
        })
    }

    /// Pushes the snapshot into the Prometheus gauges.
    ///
    /// Used by `status --metrics` to export a store-backed reading
    /// without a running daemon.
    pub fn publish_gauges(&self, metrics: &MetricsCollector) {
        for status in DecisionStatus::all() {
            metrics.update_queue_depth(status.as_str(), self.decisions.count_for(*status));
        }

        for usage in &self.rates {
            metrics.update_rate_usage(usage.class.as_str(), usage.used);
        }

        if let Some(record) = &self.breaker {
            let state = BreakerState::parse(&record.state);
            metrics.update_breaker_state(state.as_u8());
        }
    }
}
