//! Database schema definitions.
//!
//! Raw SQL statements for creating the outpost tables. Statements are
//! idempotent (`IF NOT EXISTS`) and applied in order by the migration
//! runner, so indexes always follow the tables they cover.

/// SQL for creating the decisions table.
pub const CREATE_DECISIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS decisions (
    id UUID PRIMARY KEY,
    kind VARCHAR(16) NOT NULL,
    payload JSONB NOT NULL,
    fingerprint VARCHAR(64) NOT NULL,
    status VARCHAR(16) NOT NULL DEFAULT 'queued',
    scheduled_at TIMESTAMPTZ NOT NULL,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL DEFAULT 3,
    last_error TEXT,
    external_id VARCHAR(64),
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL for the readiness index used by the posting tick.
pub const CREATE_DECISIONS_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_decisions_status_scheduled
ON decisions(status, scheduled_at)
"#;

/// SQL for the fingerprint index used by duplicate detection.
pub const CREATE_DECISIONS_FINGERPRINT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_decisions_fingerprint
ON decisions(fingerprint, updated_at)
"#;

/// SQL for creating the job heartbeats table.
pub const CREATE_JOB_HEARTBEATS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS job_heartbeats (
    name VARCHAR(64) PRIMARY KEY,
    last_run TIMESTAMPTZ,
    last_success TIMESTAMPTZ,
    last_error TEXT,
    consecutive_failures INTEGER NOT NULL DEFAULT 0,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL for creating the circuit breaker state table.
pub const CREATE_BREAKER_STATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS breaker_state (
    name VARCHAR(64) PRIMARY KEY,
    state VARCHAR(16) NOT NULL DEFAULT 'closed',
    failure_streak INTEGER NOT NULL DEFAULT 0,
    success_streak INTEGER NOT NULL DEFAULT 0,
    opened_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL for creating the rate events table.
pub const CREATE_RATE_EVENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rate_events (
    id BIGSERIAL PRIMARY KEY,
    op_class VARCHAR(16) NOT NULL,
    occurred_at TIMESTAMPTZ NOT NULL
)
"#;

/// SQL for the rate window index.
pub const CREATE_RATE_EVENTS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_rate_events_class_time
ON rate_events(op_class, occurred_at)
"#;

/// SQL for creating the post metrics table.
pub const CREATE_POST_METRICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS post_metrics (
    id BIGSERIAL PRIMARY KEY,
    decision_id UUID NOT NULL REFERENCES decisions(id),
    external_id VARCHAR(64) NOT NULL,
    impressions BIGINT NOT NULL DEFAULT 0,
    likes INTEGER NOT NULL DEFAULT 0,
    replies INTEGER NOT NULL DEFAULT 0,
    reposts INTEGER NOT NULL DEFAULT 0,
    scraped_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// SQL for the per-decision metrics history index.
pub const CREATE_POST_METRICS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_post_metrics_decision
ON post_metrics(decision_id, scraped_at)
"#;

/// Returns all schema statements in creation order.
///
/// Tables come before the indexes that cover them; `post_metrics`
/// references `decisions` and therefore comes after it.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_DECISIONS_TABLE,
        CREATE_DECISIONS_STATUS_INDEX,
        CREATE_DECISIONS_FINGERPRINT_INDEX,
        CREATE_JOB_HEARTBEATS_TABLE,
        CREATE_BREAKER_STATE_TABLE,
        CREATE_RATE_EVENTS_TABLE,
        CREATE_RATE_EVENTS_INDEX,
        CREATE_POST_METRICS_TABLE,
        CREATE_POST_METRICS_INDEX,
    ]
}

/// Table names used in queries.
pub mod tables {
    /// Posting decisions and their lifecycle state.
    pub const DECISIONS: &str = "decisions";
    /// Scheduler job heartbeats.
    pub const JOB_HEARTBEATS: &str = "job_heartbeats";
    /// Circuit breaker state.
    pub const BREAKER_STATE: &str = "breaker_state";
    /// Rate limiter events.
    pub const RATE_EVENTS: &str = "rate_events";
    /// Engagement snapshots for published posts.
    pub const POST_METRICS: &str = "post_metrics";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_statements_are_idempotent() {
        for statement in all_schema_statements() {
            assert!(
                statement.contains("IF NOT EXISTS"),
                "statement is not idempotent: {}",
                statement
            );
        }
    }

    #[test]
    fn test_statement_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 9);
        // decisions must exist before its indexes and before post_metrics,
        // which references it.
        assert_eq!(statements[0], CREATE_DECISIONS_TABLE);
        assert!(statements
            .iter()
            .position(|s| *s == CREATE_POST_METRICS_TABLE)
            .unwrap()
            > 0);
        assert_eq!(statements[8], CREATE_POST_METRICS_INDEX);
    }

    #[test]
    fn test_table_names() {
        assert!(CREATE_DECISIONS_TABLE.contains(tables::DECISIONS));
        assert!(CREATE_JOB_HEARTBEATS_TABLE.contains(tables::JOB_HEARTBEATS));
        assert!(CREATE_BREAKER_STATE_TABLE.contains(tables::BREAKER_STATE));
        assert!(CREATE_RATE_EVENTS_TABLE.contains(tables::RATE_EVENTS));
        assert!(CREATE_POST_METRICS_TABLE.contains(tables::POST_METRICS));
    }

    #[test]
    fn test_decisions_columns() {
        for column in [
            "kind",
            "payload",
            "fingerprint",
            "status",
            "scheduled_at",
            "attempt_count",
            "max_attempts",
            "external_id",
        ] {
            assert!(
                CREATE_DECISIONS_TABLE.contains(column),
                "missing column {}",
                column
            );
        }
    }
}
