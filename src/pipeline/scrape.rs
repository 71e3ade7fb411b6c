//! Engagement collection for recently published posts.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::browser::BrowserPool;
use crate::limiter::{OpClass, RateLimiter};
use crate::metrics::MetricsCollector;
use crate::platform::PlatformClient;
use crate::store::Store;
use crate::OutpostConfig;

use super::posting::PipelineError;

/// How far back published posts keep receiving engagement snapshots.
const SCRAPE_LOOKBACK: Duration = Duration::from_secs(48 * 3600);

/// Upper bound on posts examined per run.
const BATCH_LIMIT: i64 = 50;

/// What one engagement scrape run did.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrapeReport {
    /// Posted decisions examined.
    pub examined: usize,
    /// Snapshots successfully collected and stored.
    pub collected: usize,
}

/// Collects engagement numbers for recently published posts.
///
/// Runs entirely in the scrape class: it waits behind deliveries at the
/// pool and spends scrape rate permits, so a busy posting pipeline is
/// never slowed down by curiosity about yesterday's numbers.
pub struct MetricsScraper {
    store: Arc<dyn Store>,
    pool: Arc<BrowserPool>,
    platform: Arc<dyn PlatformClient>,
    limiter: Arc<RateLimiter>,
    config: OutpostConfig,
    metrics: MetricsCollector,
}

impl MetricsScraper {
    /// Creates a scraper over shared components.
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

    /// Runs one engagement collection pass.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Store` if the decision store fails.
    pub async fn run(&self) -> Result<ScrapeReport, PipelineError> {
        let mut report = ScrapeReport::default();

        let posted = self
            .store
            .recently_posted(SCRAPE_LOOKBACK, BATCH_LIMIT)
            .await?;
        if posted.is_empty() {
            debug!("No recent posts to scrape");
            return Ok(report);
        }

        for decision in posted {
            // A posted decision always carries its external id; rows
            // missing one are skipped rather than trusted.
            let Some(external_id) = decision.external_id.as_deref() else {
                warn!(decision_id = %decision.id, "Posted decision has no external id");
                continue;
            };

            let now = Utc::now();
            if self.limiter.try_acquire(OpClass::Scrape, now).is_err() {
                info!(
                    examined = report.examined,
                    "Scrape window exhausted; deferring remaining posts"
                );
                break;
            }
            if let Err(e) = self.store.record_rate_event(OpClass::Scrape, now).await {
                warn!(error = %e, "Failed to persist rate event");
            }

            // One lease per post keeps deliveries interleaving with the
            // scrape sweep.
            let mut slot = match self.pool.acquire(OpClass::Scrape).await {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(error = %e, "No browser slot for engagement scrape; deferring");
                    break;
                }
            };

            report.examined += 1;
            match tokio::time::timeout(
                self.config.post_timeout,
                self.platform.scrape_metrics(slot.session(), external_id),
            )
            .await
            {
                Ok(Ok(snapshot)) => {
                    self.store
                        .record_post_metrics(decision.id, external_id, &snapshot)
                        .await?;
                    debug!(
                        decision_id = %decision.id,
                        external_id,
                        impressions = snapshot.impressions,
                        likes = snapshot.likes,
                        "Engagement snapshot stored"
                    );
                    report.collected += 1;
                }
                Ok(Err(e)) => {
                    warn!(decision_id = %decision.id, error = %e, "Engagement scrape failed; stopping run");
                    slot.mark_recycle();
                    self.metrics.record_pool_recycle("requested");
                    break;
                }
                Err(_) => {
                    warn!(decision_id = %decision.id, "Engagement scrape timed out; stopping run");
                    slot.mark_recycle();
                    self.metrics.record_pool_recycle("requested");
                    break;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserSession, PoolConfig, SessionBackend};
    use crate::error::{BridgeError, PlatformError};
    use crate::platform::VerifyProbe;
    use crate::store::{EngagementSnapshot, MemoryStore, NewDecision, Payload};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    struct FakeBackend;

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn create_session(&self) -> Result<BrowserSession, BridgeError> {
            Ok(BrowserSession::new("sess-s"))
        }

        async fn close_session(&self, _id: &str) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn ping_session(&self, _id: &str) -> Result<bool, BridgeError> {
            Ok(true)
        }
    }

    struct CountingPlatform {
        snapshots: Mutex<Vec<Result<EngagementSnapshot, PlatformError>>>,
    }

    impl CountingPlatform {
        fn new(snapshots: Vec<Result<EngagementSnapshot, PlatformError>>) -> Self {
            Self {
                snapshots: Mutex::new(snapshots),
            }
        }
    }

    #[async_trait]
    impl PlatformClient for CountingPlatform {
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
            Ok(None)
        }

        async fn scrape_metrics(
            &self,
            _session: &BrowserSession,
            _external_id: &str,
        ) -> Result<EngagementSnapshot, PlatformError> {
            let mut snapshots = self.snapshots.lock().unwrap();
            if snapshots.is_empty() {
                Ok(EngagementSnapshot::default())
            } else {
                snapshots.remove(0)
            }
        }
    }

    fn test_config() -> OutpostConfig {
        OutpostConfig::default()
            .with_pool_capacity(2)
            .with_acquire_timeout(Duration::from_secs(2))
    }

    async fn posted_decision(store: &MemoryStore, text: &str, external_id: &str) -> Uuid {
        let decision = store
            .enqueue(NewDecision::new(Payload::Single {
                text: text.to_string(),
            }))
            .await
            .unwrap();
        assert!(store.try_claim(decision.id).await.unwrap());
        assert!(store.mark_delivering(decision.id).await.unwrap());
        assert!(store.mark_posted(decision.id, external_id).await.unwrap());
        decision.id
    }

    fn scraper(
        config: OutpostConfig,
        store: Arc<MemoryStore>,
        platform: Arc<CountingPlatform>,
    ) -> MetricsScraper {
        let pool = Arc::new(BrowserPool::new(
            PoolConfig::from_config(&config),
            Arc::new(FakeBackend),
        ));
        let limiter = Arc::new(RateLimiter::from_config(&config));
        MetricsScraper::new(store, pool, platform, limiter, config)
    }

    #[tokio::test]
    async fn test_collects_snapshot_for_posted_decision() {
        let store = Arc::new(MemoryStore::new());
        let id = posted_decision(&store, "popular post", "ext-1").await;
        let snapshot = EngagementSnapshot {
            impressions: 1200,
            likes: 40,
            replies: 6,
            reposts: 11,
        };
        let platform = Arc::new(CountingPlatform::new(vec![Ok(snapshot)]));
        let job = scraper(test_config(), store.clone(), platform);

        let report = job.run().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.collected, 1);
        let recorded = store.metrics_for(id);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].impressions, 1200);
        assert_eq!(recorded[0].likes, 40);
    }

    #[tokio::test]
    async fn test_idle_when_nothing_posted() {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(CountingPlatform::new(vec![]));
        let job = scraper(test_config(), store, platform);

        let report = job.run().await.unwrap();

        assert_eq!(report.examined, 0);
        assert_eq!(report.collected, 0);
    }

    #[tokio::test]
    async fn test_platform_error_stops_run() {
        let store = Arc::new(MemoryStore::new());
        posted_decision(&store, "first", "ext-1").await;
        posted_decision(&store, "second", "ext-2").await;
        let platform = Arc::new(CountingPlatform::new(vec![Err(PlatformError::Rejected {
            reason: "metrics pane missing".to_string(),
        })]));
        let job = scraper(test_config(), store.clone(), platform);

        let report = job.run().await.unwrap();

        // The run stops at the first error; the other post waits for the
        // next interval.
        assert_eq!(report.examined, 1);
        assert_eq!(report.collected, 0);
    }
}
