//! In-memory implementation of the decision store.
//!
//! Mirrors the conditional-transition semantics of the Postgres store so
//! pipeline and scheduler logic can be tested without a database. State
//! lives under one mutex; transitions check the same from-states the SQL
//! `WHERE` clauses name.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::limiter::OpClass;
use crate::utils::time::{ago, to_chrono};

use super::{
    BreakerRecord, Decision, DecisionCounts, DecisionStatus, EngagementSnapshot, JobHeartbeat,
    NewDecision, Store, StoreError,
};

#[derive(Default)]
struct Inner {
    decisions: HashMap<Uuid, Decision>,
    heartbeats: HashMap<String, JobHeartbeat>,
    breakers: HashMap<String, BreakerRecord>,
    rate_events: Vec<(OpClass, DateTime<Utc>)>,
    post_metrics: Vec<(Uuid, String, EngagementSnapshot, DateTime<Utc>)>,
}

/// Decision store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engagement snapshots recorded for a decision, oldest first.
    pub fn metrics_for(&self, decision_id: Uuid) -> Vec<EngagementSnapshot> {
        self.lock()
            .post_metrics
            .iter()
            .filter(|(id, _, _, _)| *id == decision_id)
            .map(|(_, _, snapshot, _)| *snapshot)
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Apply `apply` to the decision iff its status is in `from`.
    fn transition(
        &self,
        id: Uuid,
        from: &[DecisionStatus],
        apply: impl FnOnce(&mut Decision),
    ) -> bool {
        let mut inner = self.lock();
        match inner.decisions.get_mut(&id) {
            Some(decision) if from.contains(&decision.status) => {
                apply(decision);
                decision.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn enqueue(&self, new: NewDecision) -> Result<Decision, StoreError> {
        let now = Utc::now();
        let decision = Decision {
            id: Uuid::new_v4(),
            kind: new.payload.kind(),
            fingerprint: new.fingerprint(),
            payload: new.payload,
            status: DecisionStatus::Queued,
            scheduled_at: new.scheduled_at,
            attempt_count: 0,
            max_attempts: new.max_attempts,
            last_error: None,
            external_id: None,
            created_at: now,
            updated_at: now,
        };

        self.lock().decisions.insert(decision.id, decision.clone());
        Ok(decision)
    }

    async fn get(&self, id: Uuid) -> Result<Decision, StoreError> {
        self.lock()
            .decisions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn fetch_ready(&self, limit: i64, grace: Duration) -> Result<Vec<Decision>, StoreError> {
        let horizon = Utc::now() + to_chrono(grace);
        let mut ready: Vec<Decision> = self
            .lock()
            .decisions
            .values()
            .filter(|d| d.status == DecisionStatus::Queued && d.scheduled_at <= horizon)
            .cloned()
            .collect();

        ready.sort_by_key(|d| d.scheduled_at);
        ready.truncate(limit.max(0) as usize);
        Ok(ready)
    }

    async fn try_claim(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.transition(id, &[DecisionStatus::Queued], |d| {
            d.status = DecisionStatus::Claimed;
        }))
    }

    async fn mark_delivering(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.transition(id, &[DecisionStatus::Claimed], |d| {
            d.status = DecisionStatus::Delivering;
            d.attempt_count += 1;
        }))
    }

    async fn release_to_queued(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.transition(
            id,
            &[DecisionStatus::Claimed, DecisionStatus::Delivering],
            |d| {
                d.status = DecisionStatus::Queued;
                d.scheduled_at = scheduled_at;
            },
        ))
    }

    async fn requeue_with_backoff(
        &self,
        id: Uuid,
        error: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.transition(id, &[DecisionStatus::Delivering], |d| {
            d.status = DecisionStatus::Queued;
            d.scheduled_at = scheduled_at;
            d.last_error = Some(error.to_string());
        }))
    }

    async fn mark_posted(&self, id: Uuid, external_id: &str) -> Result<bool, StoreError> {
        Ok(self.transition(id, &[DecisionStatus::Delivering], |d| {
            d.status = DecisionStatus::Posted;
            d.external_id = Some(external_id.to_string());
            d.last_error = None;
        }))
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        Ok(self.transition(id, &[DecisionStatus::Delivering], |d| {
            d.status = DecisionStatus::Failed;
            d.last_error = Some(error.to_string());
        }))
    }

    async fn mark_duplicate(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.transition(id, &[DecisionStatus::Queued], |d| {
            d.status = DecisionStatus::Duplicate;
        }))
    }

    async fn reconcile_posted(&self, id: Uuid, external_id: &str) -> Result<bool, StoreError> {
        Ok(self.transition(id, &[DecisionStatus::Failed], |d| {
            d.status = DecisionStatus::Posted;
            d.external_id = Some(external_id.to_string());
            d.last_error = None;
        }))
    }

    async fn recover_stuck(&self, older_than: Duration) -> Result<u64, StoreError> {
        let cutoff = ago(older_than);
        let mut recovered = 0;

        let mut inner = self.lock();
        for decision in inner.decisions.values_mut() {
            let stuck = matches!(
                decision.status,
                DecisionStatus::Claimed | DecisionStatus::Delivering
            );
            if stuck && decision.updated_at < cutoff {
                decision.status = DecisionStatus::Queued;
                decision.updated_at = Utc::now();
                recovered += 1;
            }
        }

        Ok(recovered)
    }

    async fn find_recent_fingerprint(
        &self,
        fingerprint: &str,
        lookback: Duration,
    ) -> Result<Option<Decision>, StoreError> {
        let cutoff = ago(lookback);
        let inner = self.lock();
        let hit = inner
            .decisions
            .values()
            .filter(|d| {
                d.fingerprint == fingerprint
                    && matches!(
                        d.status,
                        DecisionStatus::Posted | DecisionStatus::Delivering
                    )
                    && d.updated_at >= cutoff
            })
            .max_by_key(|d| d.updated_at)
            .cloned();

        Ok(hit)
    }

    async fn failed_since(
        &self,
        lookback: Duration,
        limit: i64,
    ) -> Result<Vec<Decision>, StoreError> {
        let cutoff = ago(lookback);
        let mut failed: Vec<Decision> = self
            .lock()
            .decisions
            .values()
            .filter(|d| d.status == DecisionStatus::Failed && d.updated_at >= cutoff)
            .cloned()
            .collect();

        failed.sort_by_key(|d| std::cmp::Reverse(d.updated_at));
        failed.truncate(limit.max(0) as usize);
        Ok(failed)
    }

    async fn recently_posted(
        &self,
        lookback: Duration,
        limit: i64,
    ) -> Result<Vec<Decision>, StoreError> {
        let cutoff = ago(lookback);
        let mut posted: Vec<Decision> = self
            .lock()
            .decisions
            .values()
            .filter(|d| d.status == DecisionStatus::Posted && d.updated_at >= cutoff)
            .cloned()
            .collect();

        posted.sort_by_key(|d| std::cmp::Reverse(d.updated_at));
        posted.truncate(limit.max(0) as usize);
        Ok(posted)
    }

    async fn status_counts(&self) -> Result<DecisionCounts, StoreError> {
        let mut counts = DecisionCounts::default();
        for decision in self.lock().decisions.values() {
            counts.bump(decision.status, 1);
        }
        Ok(counts)
    }

    async fn save_heartbeat(&self, heartbeat: &JobHeartbeat) -> Result<(), StoreError> {
        self.lock()
            .heartbeats
            .insert(heartbeat.name.clone(), heartbeat.clone());
        Ok(())
    }

    async fn load_heartbeats(&self) -> Result<Vec<JobHeartbeat>, StoreError> {
        let mut heartbeats: Vec<JobHeartbeat> = self.lock().heartbeats.values().cloned().collect();
        heartbeats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(heartbeats)
    }

    async fn load_breaker(&self, name: &str) -> Result<Option<BreakerRecord>, StoreError> {
        Ok(self.lock().breakers.get(name).cloned())
    }

    async fn save_breaker(&self, record: &BreakerRecord) -> Result<(), StoreError> {
        self.lock()
            .breakers
            .insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn record_rate_event(&self, class: OpClass, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.lock().rate_events.push((class, at));
        Ok(())
    }

    async fn load_rate_events(
        &self,
        class: OpClass,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let mut events: Vec<DateTime<Utc>> = self
            .lock()
            .rate_events
            .iter()
            .filter(|(c, at)| *c == class && *at >= since)
            .map(|(_, at)| *at)
            .collect();

        events.sort();
        Ok(events)
    }

    async fn prune_rate_events(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut inner = self.lock();
        let before = inner.rate_events.len();
        inner.rate_events.retain(|(_, at)| *at >= cutoff);
        Ok((before - inner.rate_events.len()) as u64)
    }

    async fn record_post_metrics(
        &self,
        decision_id: Uuid,
        external_id: &str,
        snapshot: &EngagementSnapshot,
    ) -> Result<(), StoreError> {
        self.lock()
            .post_metrics
            .push((decision_id, external_id.to_string(), *snapshot, Utc::now()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Payload;

    fn single(text: &str) -> NewDecision {
        NewDecision::new(Payload::Single {
            text: text.to_string(),
        })
    }

    #[tokio::test]
    async fn test_happy_path_lifecycle() {
        let store = MemoryStore::new();
        let decision = store.enqueue(single("hello world")).await.unwrap();
        assert_eq!(decision.status, DecisionStatus::Queued);
        assert_eq!(decision.attempt_count, 0);

        assert!(store.try_claim(decision.id).await.unwrap());
        assert!(store.mark_delivering(decision.id).await.unwrap());
        assert!(store.mark_posted(decision.id, "98765").await.unwrap());

        let done = store.get(decision.id).await.unwrap();
        assert_eq!(done.status, DecisionStatus::Posted);
        assert_eq!(done.external_id.as_deref(), Some("98765"));
        assert_eq!(done.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = MemoryStore::new();
        let decision = store.enqueue(single("contested")).await.unwrap();

        assert!(store.try_claim(decision.id).await.unwrap());
        // Second claim loses.
        assert!(!store.try_claim(decision.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_illegal_transitions_do_nothing() {
        let store = MemoryStore::new();
        let decision = store.enqueue(single("strict")).await.unwrap();

        // Cannot deliver or settle a queued decision directly.
        assert!(!store.mark_delivering(decision.id).await.unwrap());
        assert!(!store.mark_posted(decision.id, "1").await.unwrap());
        assert!(!store.mark_failed(decision.id, "nope").await.unwrap());

        let unchanged = store.get(decision.id).await.unwrap();
        assert_eq!(unchanged.status, DecisionStatus::Queued);
        assert_eq!(unchanged.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_attempts_count_at_delivery_start() {
        let store = MemoryStore::new();
        let decision = store.enqueue(single("retry me")).await.unwrap();

        for attempt in 1..=2 {
            assert!(store.try_claim(decision.id).await.unwrap());
            assert!(store.mark_delivering(decision.id).await.unwrap());
            let current = store.get(decision.id).await.unwrap();
            assert_eq!(current.attempt_count, attempt);
            assert!(store
                .requeue_with_backoff(decision.id, "rejected", Utc::now())
                .await
                .unwrap());
        }

        // Third attempt succeeds, count stays at three.
        assert!(store.try_claim(decision.id).await.unwrap());
        assert!(store.mark_delivering(decision.id).await.unwrap());
        assert!(store.mark_posted(decision.id, "42").await.unwrap());
        let done = store.get(decision.id).await.unwrap();
        assert_eq!(done.attempt_count, 3);
        assert_eq!(done.status, DecisionStatus::Posted);
    }

    #[tokio::test]
    async fn test_release_does_not_consume_attempt() {
        let store = MemoryStore::new();
        let decision = store.enqueue(single("gated")).await.unwrap();

        assert!(store.try_claim(decision.id).await.unwrap());
        let later = Utc::now() + chrono::Duration::minutes(1);
        assert!(store.release_to_queued(decision.id, later).await.unwrap());

        let released = store.get(decision.id).await.unwrap();
        assert_eq!(released.status, DecisionStatus::Queued);
        assert_eq!(released.attempt_count, 0);
        assert_eq!(released.scheduled_at, later);
    }

    #[tokio::test]
    async fn test_reconcile_only_corrects_failed() {
        let store = MemoryStore::new();
        let decision = store.enqueue(single("lost post")).await.unwrap();

        store.try_claim(decision.id).await.unwrap();
        store.mark_delivering(decision.id).await.unwrap();
        store.mark_failed(decision.id, "timeout").await.unwrap();

        assert!(store.reconcile_posted(decision.id, "777").await.unwrap());
        let fixed = store.get(decision.id).await.unwrap();
        assert_eq!(fixed.status, DecisionStatus::Posted);
        assert_eq!(fixed.external_id.as_deref(), Some("777"));
        assert!(fixed.last_error.is_none());

        // Already posted: reconcile has nothing to do.
        assert!(!store.reconcile_posted(decision.id, "888").await.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_ready_orders_and_respects_grace() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let late = store
            .enqueue(single("later").with_scheduled_at(now + chrono::Duration::seconds(10)))
            .await
            .unwrap();
        let early = store
            .enqueue(single("sooner").with_scheduled_at(now - chrono::Duration::seconds(10)))
            .await
            .unwrap();
        let far = store
            .enqueue(single("tomorrow").with_scheduled_at(now + chrono::Duration::hours(20)))
            .await
            .unwrap();

        let ready = store
            .fetch_ready(10, Duration::from_secs(30))
            .await
            .unwrap();
        let ids: Vec<Uuid> = ready.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![early.id, late.id]);
        assert!(!ids.contains(&far.id));
    }

    #[tokio::test]
    async fn test_fingerprint_lookup() {
        let store = MemoryStore::new();
        let decision = store.enqueue(single("same  CONTENT")).await.unwrap();
        store.try_claim(decision.id).await.unwrap();
        store.mark_delivering(decision.id).await.unwrap();
        store.mark_posted(decision.id, "1").await.unwrap();

        // Same normalized content, different cosmetics.
        let twin = single("same content");
        let hit = store
            .find_recent_fingerprint(&twin.fingerprint(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(hit.map(|d| d.id), Some(decision.id));

        let miss = store
            .find_recent_fingerprint(&single("different").fingerprint(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_recover_stuck_delivering() {
        let store = MemoryStore::new();
        let decision = store.enqueue(single("stuck")).await.unwrap();
        store.try_claim(decision.id).await.unwrap();
        store.mark_delivering(decision.id).await.unwrap();

        // Not stuck yet with a generous threshold.
        assert_eq!(store.recover_stuck(Duration::from_secs(3600)).await.unwrap(), 0);

        // Zero threshold treats any delivering decision as stuck.
        assert_eq!(store.recover_stuck(Duration::ZERO).await.unwrap(), 1);
        let recovered = store.get(decision.id).await.unwrap();
        assert_eq!(recovered.status, DecisionStatus::Queued);
        assert_eq!(recovered.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_recover_stuck_abandoned_claim() {
        let store = MemoryStore::new();
        let decision = store.enqueue(single("claimed then crashed")).await.unwrap();
        store.try_claim(decision.id).await.unwrap();

        // A worker that died after claiming but before delivering left the
        // row in claimed; recovery returns it to the queue.
        assert_eq!(store.recover_stuck(Duration::ZERO).await.unwrap(), 1);
        let recovered = store.get(decision.id).await.unwrap();
        assert_eq!(recovered.status, DecisionStatus::Queued);
        // No delivery attempt ever started.
        assert_eq!(recovered.attempt_count, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_upsert() {
        let store = MemoryStore::new();
        let mut heartbeat = JobHeartbeat::new("posting");
        store.save_heartbeat(&heartbeat).await.unwrap();

        heartbeat.last_success = Some(Utc::now());
        heartbeat.consecutive_failures = 0;
        store.save_heartbeat(&heartbeat).await.unwrap();

        let all = store.load_heartbeats().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].last_success.is_some());
    }

    #[tokio::test]
    async fn test_rate_events_round_trip_and_prune() {
        let store = MemoryStore::new();
        let now = Utc::now();

        store
            .record_rate_event(OpClass::Delivery, now - chrono::Duration::minutes(30))
            .await
            .unwrap();
        store
            .record_rate_event(OpClass::Delivery, now - chrono::Duration::hours(3))
            .await
            .unwrap();
        store
            .record_rate_event(OpClass::Scrape, now)
            .await
            .unwrap();

        let recent = store
            .load_rate_events(OpClass::Delivery, now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(recent.len(), 1);

        let pruned = store
            .prune_rate_events(now - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(pruned, 1);
    }

    #[tokio::test]
    async fn test_status_counts() {
        let store = MemoryStore::new();
        let a = store.enqueue(single("a")).await.unwrap();
        store.enqueue(single("b")).await.unwrap();
        store.try_claim(a.id).await.unwrap();

        let counts = store.status_counts().await.unwrap();
        assert_eq!(counts.queued, 1);
        assert_eq!(counts.claimed, 1);
        assert_eq!(counts.total(), 2);
    }
}
