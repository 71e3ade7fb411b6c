//! Corrects `failed` decisions whose posts actually went live.
//!
//! A delivery can fail on this side of the browser while the platform
//! accepted the post: the classic case is a timeout whose verification
//! probe also timed out. This job re-checks recent failures against the
//! platform and promotes the ones with live evidence to `posted`. That is
//! the only correction it makes; `posted` decisions are never revisited.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::browser::BrowserPool;
use crate::limiter::{OpClass, RateLimiter};
use crate::metrics::MetricsCollector;
use crate::platform::{PlatformClient, VerifyProbe};
use crate::store::{Decision, Store};
use crate::utils::time::to_chrono;
use crate::OutpostConfig;

use super::posting::PipelineError;

/// Upper bound on failures examined per run.
const BATCH_LIMIT: i64 = 25;

/// What one reconciliation run did.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileReport {
    /// Failed decisions examined.
    pub examined: usize,
    /// Decisions corrected to `posted`.
    pub reconciled: usize,
}

/// Re-checks recent failures against the platform.
pub struct Reconciler {
    store: Arc<dyn Store>,
    pool: Arc<BrowserPool>,
    platform: Arc<dyn PlatformClient>,
    limiter: Arc<RateLimiter>,
    config: OutpostConfig,
    metrics: MetricsCollector,
}

impl Reconciler {
    /// Creates a reconciler over shared components.
    pub fn new(
        store: Arc<dyn Store>,
        pool: Arc<BrowserPool>,
        platform: Arc<dyn PlatformClient>,
        limiter: Arc<RateLimiter>,
        config: OutpostConfig,
    ) -> Self {
        Self {
            store,
            pool,
            platform,
            limiter,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Runs one reconciliation pass.
    ///
    /// Each failure is checked through its own scrape-class slot lease,
    /// so deliveries can interleave between checks. The run stops early
    /// when the scrape window is exhausted, no slot frees up, or the
    /// browser stops cooperating; the remaining failures wait for the
    /// next run.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Store` if the decision store fails.
    pub async fn run(&self) -> Result<ReconcileReport, PipelineError> {
        let mut report = ReconcileReport::default();

        let failed = self
            .store
            .failed_since(self.config.reconcile_lookback, BATCH_LIMIT)
            .await?;
        if failed.is_empty() {
            debug!("No recent failures to reconcile");
            return Ok(report);
        }

        for decision in failed {
            let now = Utc::now();
            if self.limiter.try_acquire(OpClass::Scrape, now).is_err() {
                info!(
                    examined = report.examined,
                    "Scrape window exhausted; deferring remaining failures"
                );
                break;
            }
            if let Err(e) = self.store.record_rate_event(OpClass::Scrape, now).await {
                warn!(error = %e, "Failed to persist rate event");
            }

            let mut slot = match self.pool.acquire(OpClass::Scrape).await {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(error = %e, "No browser slot for reconciliation; deferring");
                    break;
                }
            };

            report.examined += 1;
            let probe = self.probe_for(&decision);

            match tokio::time::timeout(
                self.config.post_timeout,
                self.platform.verify(slot.session(), &probe),
            )
            .await
            {
                Ok(Ok(Some(external_id))) => {
                    if self.store.reconcile_posted(decision.id, &external_id).await? {
                        info!(
                            decision_id = %decision.id,
                            external_id = %external_id,
                            "Failed decision found live; reconciled to posted"
                        );
                        self.metrics.record_reconciled();
                        report.reconciled += 1;
                    }
                }
                Ok(Ok(None)) => {
                    debug!(decision_id = %decision.id, "No live evidence; failure stands");
                }
                Ok(Err(e)) => {
                    warn!(decision_id = %decision.id, error = %e, "Verification failed; stopping run");
                    slot.mark_recycle();
                    break;
                }
                Err(_) => {
                    warn!(decision_id = %decision.id, "Verification timed out; stopping run");
                    slot.mark_recycle();
                    break;
                }
            }
        }

        Ok(report)
    }

    /// Evidence probe for a failed decision.
    ///
    /// Only posts published inside the verification window before the
    /// failure was recorded can belong to the failed attempt.
    fn probe_for(&self, decision: &Decision) -> VerifyProbe {
        let since = decision.updated_at - to_chrono(self.config.verify_window);
        VerifyProbe::new(
            decision.payload.lead_text(),
            decision.fingerprint.clone(),
            since,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserSession, PoolConfig, SessionBackend};
    use crate::error::{BridgeError, PlatformError};
    use crate::store::{DecisionStatus, EngagementSnapshot, MemoryStore, NewDecision, Payload};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use uuid::Uuid;

    struct FakeBackend;

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn create_session(&self) -> Result<BrowserSession, BridgeError> {
            Ok(BrowserSession::new("sess-r"))
        }

        async fn close_session(&self, _id: &str) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn ping_session(&self, _id: &str) -> Result<bool, BridgeError> {
            Ok(true)
        }
    }

    struct VerifyingPlatform {
        answer: Mutex<Option<String>>,
        calls: AtomicUsize,
    }

    impl VerifyingPlatform {
        fn new(answer: Option<&str>) -> Self {
            Self {
                answer: Mutex::new(answer.map(str::to_string)),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl crate::platform::PlatformClient for VerifyingPlatform {
        async fn deliver_part(
            &self,
            _session: &BrowserSession,
            _text: &str,
            _reply_to: Option<&str>,
        ) -> Result<String, PlatformError> {
            Ok("unused".to_string())
        }

        async fn verify(
            &self,
            _session: &BrowserSession,
            _probe: &VerifyProbe,
        ) -> Result<Option<String>, PlatformError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer.lock().unwrap().clone())
        }

        async fn scrape_metrics(
            &self,
            _session: &BrowserSession,
            _external_id: &str,
        ) -> Result<EngagementSnapshot, PlatformError> {
            Ok(EngagementSnapshot::default())
        }
    }

    fn test_config() -> OutpostConfig {
        OutpostConfig::default()
            .with_pool_capacity(2)
            .with_acquire_timeout(Duration::from_secs(2))
    }

    async fn failed_decision(store: &MemoryStore, text: &str) -> Uuid {
        let decision = store
            .enqueue(NewDecision::new(Payload::Single {
                text: text.to_string(),
            }))
            .await
            .unwrap();
        assert!(store.try_claim(decision.id).await.unwrap());
        assert!(store.mark_delivering(decision.id).await.unwrap());
        assert!(store
            .mark_failed(decision.id, "delivery timed out")
            .await
            .unwrap());
        decision.id
    }

    fn reconciler(
        config: OutpostConfig,
        store: Arc<MemoryStore>,
        platform: Arc<VerifyingPlatform>,
    ) -> Reconciler {
        let pool = Arc::new(BrowserPool::new(
            PoolConfig::from_config(&config),
            Arc::new(FakeBackend),
        ));
        let limiter = Arc::new(RateLimiter::from_config(&config));
        Reconciler::new(store, pool, platform, limiter, config)
    }

    #[tokio::test]
    async fn test_reconciles_failed_decision_found_live() {
        let store = Arc::new(MemoryStore::new());
        let id = failed_decision(&store, "lost in transit").await;
        let platform = Arc::new(VerifyingPlatform::new(Some("ext-5")));
        let job = reconciler(test_config(), store.clone(), platform.clone());

        let report = job.run().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.reconciled, 1);
        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Posted);
        assert_eq!(stored.external_id.as_deref(), Some("ext-5"));
        assert_eq!(platform.calls(), 1);
    }

    #[tokio::test]
    async fn test_failure_stands_without_live_evidence() {
        let store = Arc::new(MemoryStore::new());
        let id = failed_decision(&store, "genuinely failed").await;
        let platform = Arc::new(VerifyingPlatform::new(None));
        let job = reconciler(test_config(), store.clone(), platform);

        let report = job.run().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.reconciled, 0);
        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Failed);
        assert!(stored.external_id.is_none());
    }

    #[tokio::test]
    async fn test_old_failures_outside_lookback_are_left_alone() {
        let store = Arc::new(MemoryStore::new());
        failed_decision(&store, "ancient history").await;
        let platform = Arc::new(VerifyingPlatform::new(Some("ext-9")));
        let config = test_config().with_reconcile_lookback(Duration::ZERO);
        let job = reconciler(config, store.clone(), platform.clone());

        let report = job.run().await.unwrap();

        assert_eq!(report.examined, 0);
        assert_eq!(platform.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_scrape_window_defers_run() {
        let store = Arc::new(MemoryStore::new());
        failed_decision(&store, "will wait").await;
        let platform = Arc::new(VerifyingPlatform::new(Some("ext-1")));
        let config = test_config().with_scrapes_per_hour(0);
        let job = reconciler(config, store.clone(), platform.clone());

        let report = job.run().await.unwrap();

        assert_eq!(report.examined, 0);
        assert_eq!(report.reconciled, 0);
        assert_eq!(platform.calls(), 0);
    }
}
