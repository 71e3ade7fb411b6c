//! PostgreSQL implementation of the decision store.
//!
//! All lifecycle transitions are conditional updates: the `WHERE` clause
//! names the states the transition table allows, and `rows_affected`
//! reports whether this worker won. No process-local locking is involved,
//! so any number of orchestrator processes may share one database.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::limiter::OpClass;
use crate::utils::time::{ago, to_chrono};

use super::{
    BreakerRecord, Decision, DecisionCounts, DecisionKind, DecisionStatus, EngagementSnapshot,
    JobHeartbeat, MigrationError, MigrationRunner, NewDecision, Store, StoreError,
};

const DECISION_COLUMNS: &str = "id, kind, payload, fingerprint, status, scheduled_at, \
     attempt_count, max_attempts, last_error, external_id, created_at, updated_at";

/// Decision store backed by PostgreSQL.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database and builds a store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ConnectionFailed` if the database is
    /// unreachable.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates a store from an existing connection pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs all pending schema migrations.
    pub async fn run_migrations(&self) -> Result<(), MigrationError> {
        MigrationRunner::new(self.pool.clone()).run_migrations().await
    }
}

fn decision_from_row(row: &PgRow) -> Result<Decision, StoreError> {
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let payload: serde_json::Value = row.try_get("payload")?;

    Ok(Decision {
        id: row.try_get("id")?,
        kind: DecisionKind::parse(&kind)?,
        payload: serde_json::from_value(payload)?,
        fingerprint: row.try_get("fingerprint")?,
        status: DecisionStatus::parse(&status)?,
        scheduled_at: row.try_get("scheduled_at")?,
        attempt_count: row.try_get("attempt_count")?,
        max_attempts: row.try_get("max_attempts")?,
        last_error: row.try_get("last_error")?,
        external_id: row.try_get("external_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn enqueue(&self, new: NewDecision) -> Result<Decision, StoreError> {
        let id = Uuid::new_v4();
        let fingerprint = new.fingerprint();
        let payload = serde_json::to_value(&new.payload)?;

        let sql = format!(
            "INSERT INTO decisions \
                 (id, kind, payload, fingerprint, status, scheduled_at, \
                  attempt_count, max_attempts, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, 'queued', $5, 0, $6, NOW(), NOW()) \
             RETURNING {DECISION_COLUMNS}"
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .bind(new.payload.kind().as_str())
            .bind(payload)
            .bind(&fingerprint)
            .bind(new.scheduled_at)
            .bind(new.max_attempts)
            .fetch_one(&self.pool)
            .await?;

        decision_from_row(&row)
    }

    async fn get(&self, id: Uuid) -> Result<Decision, StoreError> {
        let sql = format!("SELECT {DECISION_COLUMNS} FROM decisions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound(id))?;

        decision_from_row(&row)
    }

    async fn fetch_ready(&self, limit: i64, grace: Duration) -> Result<Vec<Decision>, StoreError> {
        let horizon = Utc::now() + to_chrono(grace);
        let sql = format!(
            "SELECT {DECISION_COLUMNS} FROM decisions \
             WHERE status = 'queued' AND scheduled_at <= $1 \
             ORDER BY scheduled_at ASC \
             LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(horizon)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decision_from_row).collect()
    }

    async fn try_claim(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE decisions SET status = 'claimed', updated_at = NOW() \
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_delivering(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE decisions SET status = 'delivering', \
                 attempt_count = attempt_count + 1, updated_at = NOW() \
             WHERE id = $1 AND status = 'claimed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn release_to_queued(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE decisions SET status = 'queued', scheduled_at = $2, updated_at = NOW() \
             WHERE id = $1 AND status IN ('claimed', 'delivering')",
        )
        .bind(id)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn requeue_with_backoff(
        &self,
        id: Uuid,
        error: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE decisions SET status = 'queued', scheduled_at = $2, \
                 last_error = $3, updated_at = NOW() \
             WHERE id = $1 AND status = 'delivering'",
        )
        .bind(id)
        .bind(scheduled_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_posted(&self, id: Uuid, external_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE decisions SET status = 'posted', external_id = $2, \
                 last_error = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'delivering'",
        )
        .bind(id)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE decisions SET status = 'failed', last_error = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'delivering'",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_duplicate(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE decisions SET status = 'duplicate', updated_at = NOW() \
             WHERE id = $1 AND status = 'queued'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn reconcile_posted(&self, id: Uuid, external_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE decisions SET status = 'posted', external_id = $2, \
                 last_error = NULL, updated_at = NOW() \
             WHERE id = $1 AND status = 'failed'",
        )
        .bind(id)
        .bind(external_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn recover_stuck(&self, older_than: Duration) -> Result<u64, StoreError> {
        let cutoff = ago(older_than);
        let result = sqlx::query(
            "UPDATE decisions SET status = 'queued', updated_at = NOW() \
             WHERE status IN ('claimed', 'delivering') AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn find_recent_fingerprint(
        &self,
        fingerprint: &str,
        lookback: Duration,
    ) -> Result<Option<Decision>, StoreError> {
        let cutoff = ago(lookback);
        let sql = format!(
            "SELECT {DECISION_COLUMNS} FROM decisions \
             WHERE fingerprint = $1 AND status IN ('posted', 'delivering') \
                 AND updated_at >= $2 \
             ORDER BY updated_at DESC \
             LIMIT 1"
        );

        let row = sqlx::query(&sql)
            .bind(fingerprint)
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(decision_from_row).transpose()
    }

    async fn failed_since(
        &self,
        lookback: Duration,
        limit: i64,
    ) -> Result<Vec<Decision>, StoreError> {
        let cutoff = ago(lookback);
        let sql = format!(
            "SELECT {DECISION_COLUMNS} FROM decisions \
             WHERE status = 'failed' AND updated_at >= $1 \
             ORDER BY updated_at DESC \
             LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decision_from_row).collect()
    }

    async fn recently_posted(
        &self,
        lookback: Duration,
        limit: i64,
    ) -> Result<Vec<Decision>, StoreError> {
        let cutoff = ago(lookback);
        let sql = format!(
            "SELECT {DECISION_COLUMNS} FROM decisions \
             WHERE status = 'posted' AND updated_at >= $1 \
             ORDER BY updated_at DESC \
             LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(cutoff)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decision_from_row).collect()
    }

    async fn status_counts(&self) -> Result<DecisionCounts, StoreError> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM decisions GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = DecisionCounts::default();
        for (status, count) in rows {
            counts.bump(DecisionStatus::parse(&status)?, count.max(0) as u64);
        }

        Ok(counts)
    }

    async fn save_heartbeat(&self, heartbeat: &JobHeartbeat) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO job_heartbeats \
                 (name, last_run, last_success, last_error, consecutive_failures, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (name) DO UPDATE SET \
                 last_run = EXCLUDED.last_run, \
                 last_success = EXCLUDED.last_success, \
                 last_error = EXCLUDED.last_error, \
                 consecutive_failures = EXCLUDED.consecutive_failures, \
                 updated_at = NOW()",
        )
        .bind(&heartbeat.name)
        .bind(heartbeat.last_run)
        .bind(heartbeat.last_success)
        .bind(&heartbeat.last_error)
        .bind(heartbeat.consecutive_failures)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_heartbeats(&self) -> Result<Vec<JobHeartbeat>, StoreError> {
        let heartbeats: Vec<JobHeartbeat> = sqlx::query_as(
            "SELECT name, last_run, last_success, last_error, consecutive_failures, updated_at \
             FROM job_heartbeats ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(heartbeats)
    }

    async fn load_breaker(&self, name: &str) -> Result<Option<BreakerRecord>, StoreError> {
        let record: Option<BreakerRecord> = sqlx::query_as(
            "SELECT name, state, failure_streak, success_streak, opened_at, updated_at \
             FROM breaker_state WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn save_breaker(&self, record: &BreakerRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO breaker_state \
                 (name, state, failure_streak, success_streak, opened_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW()) \
             ON CONFLICT (name) DO UPDATE SET \
                 state = EXCLUDED.state, \
                 failure_streak = EXCLUDED.failure_streak, \
                 success_streak = EXCLUDED.success_streak, \
                 opened_at = EXCLUDED.opened_at, \
                 updated_at = NOW()",
        )
        .bind(&record.name)
        .bind(&record.state)
        .bind(record.failure_streak)
        .bind(record.success_streak)
        .bind(record.opened_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_rate_event(&self, class: OpClass, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO rate_events (op_class, occurred_at) VALUES ($1, $2)")
            .bind(class.as_str())
            .bind(at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_rate_events(
        &self,
        class: OpClass,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError> {
        let rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT occurred_at FROM rate_events \
             WHERE op_class = $1 AND occurred_at >= $2 \
             ORDER BY occurred_at ASC",
        )
        .bind(class.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(at,)| at).collect())
    }

    async fn prune_rate_events(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM rate_events WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn record_post_metrics(
        &self,
        decision_id: Uuid,
        external_id: &str,
        snapshot: &EngagementSnapshot,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO post_metrics \
                 (decision_id, external_id, impressions, likes, replies, reposts, scraped_at) \
             VALUES ($1, $2, $3, $4, $5, $6, NOW())",
        )
        .bind(decision_id)
        .bind(external_id)
        .bind(snapshot.impressions)
        .bind(snapshot.likes)
        .bind(snapshot.replies)
        .bind(snapshot.reposts)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
