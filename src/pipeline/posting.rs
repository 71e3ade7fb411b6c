//! The posting tick: claims ready decisions and delivers them.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerState, CircuitBreaker, DELIVERY_BREAKER};
use crate::browser::{BrowserPool, SlotHandle};
use crate::error::PlatformError;
use crate::limiter::{OpClass, RateLimiter};
use crate::metrics::MetricsCollector;
use crate::platform::{PlatformClient, VerifyProbe};
use crate::store::{Decision, Store, StoreError};
use crate::utils::time::to_chrono;
use crate::OutpostConfig;

use super::chain::{deliver_chain, ChainFailure};

/// Errors that can abort a pipeline tick.
///
/// Only decision-store failures abort: every platform, pool, and rate
/// outcome settles into the decision's own state instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Decision store error.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What one tick did, for logs, tests and the `post-once` command.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TickReport {
    /// Ready decisions examined this tick.
    pub examined: usize,
    /// Decisions that reached `posted`.
    pub posted: usize,
    /// Decisions marked `duplicate`.
    pub duplicates: usize,
    /// Failed attempts re-queued with backoff.
    pub requeued: usize,
    /// Decisions that exhausted their attempts.
    pub failed: usize,
    /// Decisions released because the delivery window was full.
    pub rate_limited: usize,
    /// Decisions released because the breaker refused them.
    pub breaker_rejected: usize,
    /// Decisions released because no browser slot freed up.
    pub pool_starved: usize,
    /// The whole tick was skipped because the breaker is open.
    pub skipped_open: bool,
}

/// Claims ready posting decisions and walks them through delivery.
///
/// One tick is one batch: dedup, claim, rate gate, breaker gate, browser
/// slot, chain delivery, settlement. Decisions stopped by a gate are
/// released back to `queued` without consuming an attempt; only a real
/// delivery attempt moves the attempt counter or feeds the breaker.
pub struct PostingPipeline {
    store: Arc<dyn Store>,
    pool: Arc<BrowserPool>,
    platform: Arc<dyn PlatformClient>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
    config: OutpostConfig,
    metrics: MetricsCollector,
}

impl PostingPipeline {
    /// Creates a pipeline over shared components.
    pub fn new(
        store: Arc<dyn Store>,
        pool: Arc<BrowserPool>,
        platform: Arc<dyn PlatformClient>,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<RateLimiter>,
        config: OutpostConfig,
    ) -> Self {
        Self {
            store,
            pool,
            platform,
            breaker,
            limiter,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Runs one posting tick.
    ///
    /// While the breaker is open and cooling down the tick does not touch
    /// the queue at all. A half-open breaker admits a single probe
    /// decision; a breaker that opens mid-batch stops the batch.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Store` if the decision store fails; all
    /// other failures settle into decision state.
    pub async fn tick(&self) -> Result<TickReport, PipelineError> {
        let mut report = TickReport::default();

        match self.breaker.check() {
            Err(open) => {
                debug!(retry_after = ?open.retry_after, "Breaker open; skipping tick");
                report.skipped_open = true;
                return Ok(report);
            }
            Ok(Some(entered)) => self.note_breaker_transition(entered).await,
            Ok(None) => {}
        }

        let batch = if self.breaker.state() == BreakerState::HalfOpen {
            // Probe one decision at a time until the breaker settles.
            1
        } else {
            self.config.claim_batch
        };

        let ready = self.store.fetch_ready(batch, self.config.claim_grace).await?;
        if ready.is_empty() {
            return Ok(report);
        }

        for decision in ready {
            report.examined += 1;
            self.process_candidate(decision, &mut report).await?;

            if self.breaker.state() == BreakerState::Open {
                debug!("Breaker opened mid-tick; stopping batch");
                break;
            }
        }

        Ok(report)
    }

    /// Walks one ready decision through the gates and, if all pass, a
    /// delivery attempt.
    async fn process_candidate(
        &self,
        decision: Decision,
        report: &mut TickReport,
    ) -> Result<(), PipelineError> {
        let now = Utc::now();

        // Dedup before claiming, so duplicates never consume an attempt.
        if let Some(existing) = self
            .store
            .find_recent_fingerprint(&decision.fingerprint, self.config.dedup_lookback)
            .await?
        {
            if existing.id != decision.id {
                if self.store.mark_duplicate(decision.id).await? {
                    info!(
                        decision_id = %decision.id,
                        duplicate_of = %existing.id,
                        "Decision matches recent content; marked duplicate"
                    );
                    self.metrics
                        .record_delivery(decision.kind.as_str(), "duplicate", 0.0);
                    report.duplicates += 1;
                }
                return Ok(());
            }
        }

        if !self.store.try_claim(decision.id).await? {
            debug!(decision_id = %decision.id, "Decision no longer claimable");
            return Ok(());
        }

        // Rate gate. Standing down releases the claim with no attempt spent.
        if let Err(limit) = self.limiter.try_acquire(OpClass::Delivery, now) {
            let resume_at = now + to_chrono(limit.retry_after);
            self.store.release_to_queued(decision.id, resume_at).await?;
            info!(
                decision_id = %decision.id,
                used = limit.used,
                ceiling = limit.ceiling,
                retry_after = ?limit.retry_after,
                "Delivery window full; decision released"
            );
            self.metrics
                .update_rate_usage(OpClass::Delivery.as_str(), limit.used);
            report.rate_limited += 1;
            return Ok(());
        }
        if let Err(e) = self.store.record_rate_event(OpClass::Delivery, now).await {
            warn!(error = %e, "Failed to persist rate event");
        }

        // Breaker gate.
        match self.breaker.check() {
            Err(open) => {
                let resume_at = now + to_chrono(open.retry_after);
                self.store.release_to_queued(decision.id, resume_at).await?;
                debug!(decision_id = %decision.id, "Breaker refused delivery; decision released");
                report.breaker_rejected += 1;
                return Ok(());
            }
            Ok(Some(entered)) => self.note_breaker_transition(entered).await,
            Ok(None) => {}
        }

        // Browser slot.
        let slot = match self.pool.acquire(OpClass::Delivery).await {
            Ok(slot) => slot,
            Err(e) => {
                self.store.release_to_queued(decision.id, now).await?;
                warn!(decision_id = %decision.id, error = %e, "No browser slot; decision released");
                report.pool_starved += 1;
                return Ok(());
            }
        };

        if !self.store.mark_delivering(decision.id).await? {
            debug!(decision_id = %decision.id, "Decision changed under claim; skipping");
            return Ok(());
        }

        self.deliver(decision, slot, report).await
    }

    /// Runs the delivery attempt and settles its outcome.
    async fn deliver(
        &self,
        decision: Decision,
        mut slot: SlotHandle,
        report: &mut TickReport,
    ) -> Result<(), PipelineError> {
        let attempt = decision.attempt_count + 1;
        let attempt_started = Utc::now();
        let started = Instant::now();

        info!(
            decision_id = %decision.id,
            kind = decision.kind.as_str(),
            parts = decision.payload.part_count(),
            attempt,
            max_attempts = decision.max_attempts,
            session = %slot.session().id,
            "Delivering decision"
        );

        let part_budget = if decision.payload.part_count() <= 1 {
            self.config.post_timeout
        } else {
            self.config.part_timeout
        };
        let deadline = self.config.delivery_deadline(decision.payload.part_count());

        let chain_result = match tokio::time::timeout(
            deadline,
            deliver_chain(
                self.platform.as_ref(),
                slot.session(),
                &decision.payload,
                part_budget,
            ),
        )
        .await
        {
            Ok(result) => result,
            // The whole-delivery deadline fired with the chain mid-flight.
            // Progress is unknown, so treat it like an ambiguous timeout.
            Err(_) => Err(ChainFailure {
                posted: Vec::new(),
                error: PlatformError::Timeout { elapsed: deadline },
            }),
        };
        let elapsed = started.elapsed().as_secs_f64();

        match chain_result {
            Ok(posted_ids) => match posted_ids.first() {
                Some(root) => {
                    self.settle_posted(&decision, root, "posted", elapsed, report)
                        .await
                }
                None => {
                    // Payloads are validated on intake; an empty part list
                    // can only come from hand-queued rows.
                    self.store
                        .mark_failed(decision.id, "payload has no parts")
                        .await?;
                    self.metrics
                        .record_delivery(decision.kind.as_str(), "failed", elapsed);
                    report.failed += 1;
                    Ok(())
                }
            },
            Err(failure) => {
                self.settle_failure(&decision, attempt, failure, &mut slot, attempt_started, elapsed, report)
                    .await
            }
        }
    }

    /// Records a successful delivery.
    async fn settle_posted(
        &self,
        decision: &Decision,
        external_id: &str,
        outcome: &str,
        elapsed: f64,
        report: &mut TickReport,
    ) -> Result<(), PipelineError> {
        self.store.mark_posted(decision.id, external_id).await?;
        info!(
            decision_id = %decision.id,
            external_id,
            elapsed_secs = format!("{elapsed:.1}"),
            "Decision posted"
        );
        self.metrics
            .record_delivery(decision.kind.as_str(), outcome, elapsed);
        report.posted += 1;

        if let Some(entered) = self.breaker.record_success() {
            self.note_breaker_transition(entered).await;
        }
        self.persist_breaker().await;
        Ok(())
    }

    /// Settles a delivery attempt that did not publish every part.
    #[allow(clippy::too_many_arguments)]
    async fn settle_failure(
        &self,
        decision: &Decision,
        attempt: i32,
        failure: ChainFailure,
        slot: &mut SlotHandle,
        attempt_started: chrono::DateTime<Utc>,
        elapsed: f64,
        report: &mut TickReport,
    ) -> Result<(), PipelineError> {
        // The root part went live: the decision is published as far as the
        // platform is concerned. Retrying would double-post the lead, so
        // settle as posted and log the truncation.
        if let Some(root) = failure.posted.first() {
            warn!(
                decision_id = %decision.id,
                delivered = failure.posted.len(),
                total = decision.payload.part_count(),
                error = %failure.error,
                "Thread truncated mid-chain; settling as posted"
            );
            let root = root.clone();
            slot.mark_recycle();
            self.metrics.record_pool_recycle("requested");
            return self
                .settle_posted(decision, &root, "truncated", elapsed, report)
                .await;
        }

        // Nothing confirmed. Ambiguous outcomes get a verification pass
        // before they may count as failures.
        if failure.error.needs_verification() {
            if let Some(external_id) = self.verify_landed(decision, slot, attempt_started).await {
                info!(
                    decision_id = %decision.id,
                    external_id = %external_id,
                    "Delivery timed out but the post is live; settling as posted"
                );
                slot.mark_recycle();
                self.metrics.record_pool_recycle("requested");
                return self
                    .settle_posted(decision, &external_id, "posted", elapsed, report)
                    .await;
            }
        }

        // Confirmed failed attempt. A platform rejection leaves the browser
        // session usable; timeouts and bridge errors do not.
        if !matches!(failure.error, PlatformError::Rejected { .. }) {
            slot.mark_recycle();
            self.metrics.record_pool_recycle("requested");
        }

        let message = failure.error.to_string();
        if attempt >= decision.max_attempts {
            self.store.mark_failed(decision.id, &message).await?;
            warn!(
                decision_id = %decision.id,
                attempt,
                error = %message,
                "Delivery failed; attempts exhausted"
            );
            self.metrics
                .record_delivery(decision.kind.as_str(), "failed", elapsed);
            report.failed += 1;
        } else {
            let backoff = self.config.backoff_for_attempt(attempt as u32);
            let resume_at = Utc::now() + to_chrono(backoff);
            self.store
                .requeue_with_backoff(decision.id, &message, resume_at)
                .await?;
            info!(
                decision_id = %decision.id,
                attempt,
                backoff = ?backoff,
                error = %message,
                "Delivery failed; re-queued with backoff"
            );
            self.metrics
                .record_delivery(decision.kind.as_str(), "requeued", elapsed);
            report.requeued += 1;
        }

        if let Some(entered) = self.breaker.record_failure() {
            self.note_breaker_transition(entered).await;
        }
        self.persist_breaker().await;
        Ok(())
    }

    /// Checks whether a timed-out delivery actually landed.
    ///
    /// Returns the external id when the platform shows a matching post
    /// published since the attempt started.
    async fn verify_landed(
        &self,
        decision: &Decision,
        slot: &SlotHandle,
        attempt_started: chrono::DateTime<Utc>,
    ) -> Option<String> {
        let probe = VerifyProbe::new(
            decision.payload.lead_text(),
            decision.fingerprint.clone(),
            attempt_started,
        );

        match tokio::time::timeout(
            self.config.post_timeout,
            self.platform.verify(slot.session(), &probe),
        )
        .await
        {
            Ok(Ok(Some(external_id))) => {
                self.metrics.record_verification("found");
                Some(external_id)
            }
            Ok(Ok(None)) => {
                self.metrics.record_verification("missing");
                None
            }
            Ok(Err(e)) => {
                warn!(decision_id = %decision.id, error = %e, "Verification probe failed");
                self.metrics.record_verification("error");
                None
            }
            Err(_) => {
                warn!(decision_id = %decision.id, "Verification probe timed out");
                self.metrics.record_verification("error");
                None
            }
        }
    }

    async fn note_breaker_transition(&self, entered: BreakerState) {
        warn!(state = entered.as_str(), "Delivery breaker changed state");
        self.metrics.record_breaker_transition(entered.as_str());
        self.metrics.update_breaker_state(entered.as_u8());
        self.persist_breaker().await;
    }

    /// Persists the breaker so a restart resumes from the same state.
    async fn persist_breaker(&self) {
        let record = self.breaker.to_record(DELIVERY_BREAKER);
        if let Err(e) = self.store.save_breaker(&record).await {
            warn!(error = %e, "Failed to persist breaker state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserSession, PoolConfig, SessionBackend};
    use crate::error::BridgeError;
    use crate::store::{
        DecisionStatus, EngagementSnapshot, MemoryStore, NewDecision, Payload,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeBackend {
        counter: AtomicUsize,
    }

    impl FakeBackend {
        fn new() -> Self {
            Self {
                counter: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl SessionBackend for FakeBackend {
        async fn create_session(&self) -> Result<BrowserSession, BridgeError> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(BrowserSession::new(format!("sess-{n}")))
        }

        async fn close_session(&self, _id: &str) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn ping_session(&self, _id: &str) -> Result<bool, BridgeError> {
            Ok(true)
        }
    }

    /// Platform fake that replays scripted delivery outcomes and a fixed
    /// verification answer.
    struct ScriptedPlatform {
        outcomes: Mutex<VecDeque<Result<String, PlatformError>>>,
        deliver_delay: Duration,
        verify_answer: Mutex<Option<String>>,
        verify_calls: AtomicUsize,
    }

    impl ScriptedPlatform {
        fn new(outcomes: Vec<Result<String, PlatformError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                deliver_delay: Duration::ZERO,
                verify_answer: Mutex::new(None),
                verify_calls: AtomicUsize::new(0),
            }
        }

        fn with_deliver_delay(mut self, delay: Duration) -> Self {
            self.deliver_delay = delay;
            self
        }

        fn with_verify_answer(self, answer: Option<&str>) -> Self {
            *self.verify_answer.lock().unwrap() = answer.map(str::to_string);
            self
        }

        fn verify_calls(&self) -> usize {
            self.verify_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlatformClient for ScriptedPlatform {
        async fn deliver_part(
            &self,
            _session: &BrowserSession,
            _text: &str,
            _reply_to: Option<&str>,
        ) -> Result<String, PlatformError> {
            if !self.deliver_delay.is_zero() {
                tokio::time::sleep(self.deliver_delay).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("unscripted".to_string()))
        }

        async fn verify(
            &self,
            _session: &BrowserSession,
            _probe: &VerifyProbe,
        ) -> Result<Option<String>, PlatformError> {
            self.verify_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.verify_answer.lock().unwrap().clone())
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
            .with_post_timeout(Duration::from_secs(5))
            .with_part_timeout(Duration::from_secs(5))
            .with_backoff_schedule(vec![Duration::ZERO])
    }

    struct Harness {
        store: Arc<MemoryStore>,
        platform: Arc<ScriptedPlatform>,
        breaker: Arc<CircuitBreaker>,
        pipeline: PostingPipeline,
    }

    fn harness(config: OutpostConfig, platform: ScriptedPlatform) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(BrowserPool::new(
            PoolConfig::from_config(&config),
            Arc::new(FakeBackend::new()),
        ));
        let platform = Arc::new(platform);
        let breaker = Arc::new(CircuitBreaker::from_config(&config));
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let pipeline = PostingPipeline::new(
            store.clone(),
            pool,
            platform.clone(),
            breaker.clone(),
            limiter,
            config,
        );
        Harness {
            store,
            platform,
            breaker,
            pipeline,
        }
    }

    async fn enqueue_single(store: &MemoryStore, text: &str) -> Decision {
        store
            .enqueue(NewDecision::new(Payload::Single {
                text: text.to_string(),
            }))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_tick_posts_single_decision() {
        let h = harness(
            test_config(),
            ScriptedPlatform::new(vec![Ok("post-1".to_string())]),
        );
        let decision = enqueue_single(&h.store, "hello world").await;

        let report = h.pipeline.tick().await.unwrap();

        assert_eq!(report.examined, 1);
        assert_eq!(report.posted, 1);
        let stored = h.store.get(decision.id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Posted);
        assert_eq!(stored.external_id.as_deref(), Some("post-1"));
        assert_eq!(stored.attempt_count, 1);

        // The consumed delivery permit was journaled for restart hydration.
        let epoch = DateTime::<Utc>::MIN_UTC;
        let events = h
            .store
            .load_rate_events(OpClass::Delivery, epoch)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_identical_content_marked_duplicate() {
        let h = harness(
            test_config(),
            ScriptedPlatform::new(vec![Ok("post-1".to_string())]),
        );
        let first = enqueue_single(&h.store, "Fresh take on rust lifetimes").await;
        // Cosmetic differences normalize to the same fingerprint.
        let second = enqueue_single(&h.store, "  fresh   take ON rust lifetimes ").await;

        let report = h.pipeline.tick().await.unwrap();

        assert_eq!(report.posted, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(
            h.store.get(first.id).await.unwrap().status,
            DecisionStatus::Posted
        );
        let dup = h.store.get(second.id).await.unwrap();
        assert_eq!(dup.status, DecisionStatus::Duplicate);
        assert_eq!(dup.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_rejected_attempt_requeues_with_backoff() {
        let h = harness(
            test_config(),
            ScriptedPlatform::new(vec![Err(PlatformError::Rejected {
                reason: "content policy".to_string(),
            })]),
        );
        let decision = enqueue_single(&h.store, "spicy take").await;

        let report = h.pipeline.tick().await.unwrap();

        assert_eq!(report.requeued, 1);
        let stored = h.store.get(decision.id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Queued);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.last_error.as_deref().unwrap().contains("content policy"));
        // A clean rejection is not ambiguous; no verification probe runs.
        assert_eq!(h.platform.verify_calls(), 0);
    }

    #[tokio::test]
    async fn test_attempts_exhaust_to_failed() {
        let config = test_config().with_max_attempts(2);
        let h = harness(
            config,
            ScriptedPlatform::new(vec![
                Err(PlatformError::Rejected {
                    reason: "no".to_string(),
                }),
                Err(PlatformError::Rejected {
                    reason: "still no".to_string(),
                }),
            ]),
        );
        // Mirror production intake, which stamps the config budget onto
        // the row (src/generator.rs, src/cli/commands.rs).
        let decision = h
            .store
            .enqueue(
                NewDecision::new(Payload::Single {
                    text: "doomed post".to_string(),
                })
                .with_max_attempts(2),
            )
            .await
            .unwrap();

        h.pipeline.tick().await.unwrap();
        let report = h.pipeline.tick().await.unwrap();

        assert_eq!(report.failed, 1);
        let stored = h.store.get(decision.id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Failed);
        assert_eq!(stored.attempt_count, 2);
        assert!(stored.last_error.as_deref().unwrap().contains("still no"));
    }

    #[tokio::test]
    async fn test_breaker_opens_and_skips_next_tick() {
        let config = test_config()
            .with_breaker_failure_threshold(2)
            .with_breaker_cooldown(Duration::from_secs(300));
        let h = harness(
            config,
            ScriptedPlatform::new(vec![
                Err(PlatformError::Rejected {
                    reason: "down".to_string(),
                }),
                Err(PlatformError::Rejected {
                    reason: "down".to_string(),
                }),
            ]),
        );
        enqueue_single(&h.store, "first casualty").await;
        enqueue_single(&h.store, "second casualty").await;

        // Two failed attempts reach the threshold and open the breaker.
        // The batch stops at the opening failure even with more queued.
        let report = h.pipeline.tick().await.unwrap();
        assert_eq!(report.requeued, 2);
        assert_eq!(h.breaker.state(), BreakerState::Open);

        let skipped = h.pipeline.tick().await.unwrap();
        assert!(skipped.skipped_open);
        assert_eq!(skipped.examined, 0);

        // The open state survives restarts through the store.
        let record = h.store.load_breaker(DELIVERY_BREAKER).await.unwrap().unwrap();
        assert_eq!(record.state, "open");
        assert_eq!(record.failure_streak, 2);
    }

    #[tokio::test]
    async fn test_half_open_probes_one_decision() {
        let config = test_config()
            .with_breaker_failure_threshold(1)
            .with_breaker_cooldown(Duration::ZERO)
            .with_breaker_success_threshold(1)
            .with_claim_batch(5);
        let h = harness(
            config,
            ScriptedPlatform::new(vec![Ok("probe-1".to_string()), Ok("p-2".to_string()), Ok("p-3".to_string())]),
        );
        h.breaker.record_failure();
        assert_eq!(h.breaker.state(), BreakerState::Open);

        enqueue_single(&h.store, "one").await;
        enqueue_single(&h.store, "two").await;
        enqueue_single(&h.store, "three").await;

        // Cooldown of zero lets the tick admit a half-open probe, but the
        // batch is clamped to a single decision.
        let probe_report = h.pipeline.tick().await.unwrap();
        assert_eq!(probe_report.examined, 1);
        assert_eq!(probe_report.posted, 1);
        assert_eq!(h.breaker.state(), BreakerState::Closed);

        // The next tick runs at full batch size again.
        let report = h.pipeline.tick().await.unwrap();
        assert_eq!(report.examined, 2);
        assert_eq!(report.posted, 2);
    }

    #[tokio::test]
    async fn test_rate_limit_releases_without_attempt() {
        let config = test_config().with_posts_per_hour(1);
        let h = harness(
            config,
            ScriptedPlatform::new(vec![Ok("post-1".to_string())]),
        );
        enqueue_single(&h.store, "gets through").await;
        let held = enqueue_single(&h.store, "held back").await;

        let report = h.pipeline.tick().await.unwrap();

        assert_eq!(report.posted, 1);
        assert_eq!(report.rate_limited, 1);
        let stored = h.store.get(held.id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Queued);
        assert_eq!(stored.attempt_count, 0);
        // Released with a schedule pushed past the window, not immediately.
        assert!(stored.scheduled_at > Utc::now() + ChronoDuration::minutes(30));
    }

    #[tokio::test]
    async fn test_timeout_with_live_post_settles_as_posted() {
        let config = test_config().with_post_timeout(Duration::from_millis(40));
        let h = harness(
            config,
            ScriptedPlatform::new(vec![Ok("never-returned".to_string())])
                .with_deliver_delay(Duration::from_millis(250))
                .with_verify_answer(Some("ext-77")),
        );
        let decision = enqueue_single(&h.store, "slow but live").await;

        let report = h.pipeline.tick().await.unwrap();

        assert_eq!(report.posted, 1);
        assert_eq!(report.requeued, 0);
        assert_eq!(h.platform.verify_calls(), 1);
        let stored = h.store.get(decision.id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Posted);
        assert_eq!(stored.external_id.as_deref(), Some("ext-77"));
        assert_eq!(stored.attempt_count, 1);
        // A verified success counts for the breaker.
        assert_eq!(h.breaker.snapshot().failure_streak, 0);
    }

    #[tokio::test]
    async fn test_timeout_without_live_post_requeues() {
        let config = test_config().with_post_timeout(Duration::from_millis(40));
        let h = harness(
            config,
            ScriptedPlatform::new(vec![Ok("never-returned".to_string())])
                .with_deliver_delay(Duration::from_millis(250))
                .with_verify_answer(None),
        );
        let decision = enqueue_single(&h.store, "slow and lost").await;

        let report = h.pipeline.tick().await.unwrap();

        assert_eq!(report.requeued, 1);
        assert_eq!(h.platform.verify_calls(), 1);
        let stored = h.store.get(decision.id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Queued);
        assert_eq!(stored.attempt_count, 1);
        assert!(stored.last_error.as_deref().unwrap().contains("timed out"));
        assert_eq!(h.breaker.snapshot().failure_streak, 1);
    }

    #[tokio::test]
    async fn test_truncated_thread_settles_as_posted() {
        let h = harness(
            test_config(),
            ScriptedPlatform::new(vec![
                Ok("t-1".to_string()),
                Err(PlatformError::Rejected {
                    reason: "composer stuck".to_string(),
                }),
            ]),
        );
        let decision = h
            .store
            .enqueue(NewDecision::new(Payload::Thread {
                parts: vec!["one".to_string(), "two".to_string(), "three".to_string()],
            }))
            .await
            .unwrap();

        let report = h.pipeline.tick().await.unwrap();

        // The root is live; the decision settles as posted, never retried.
        assert_eq!(report.posted, 1);
        assert_eq!(report.requeued, 0);
        let stored = h.store.get(decision.id).await.unwrap();
        assert_eq!(stored.status, DecisionStatus::Posted);
        assert_eq!(stored.external_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn test_future_scheduled_decisions_wait() {
        let h = harness(test_config(), ScriptedPlatform::new(vec![]));
        h.store
            .enqueue(
                NewDecision::new(Payload::Single {
                    text: "tomorrow's news".to_string(),
                })
                .with_scheduled_at(Utc::now() + ChronoDuration::hours(6)),
            )
            .await
            .unwrap();

        let report = h.pipeline.tick().await.unwrap();

        assert_eq!(report.examined, 0);
        assert_eq!(report.posted, 0);
    }
}
