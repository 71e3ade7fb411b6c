//! Decision persistence and the posting state machine.
//!
//! A *decision* is one unit of outbound content (a single post, a thread,
//! or a reply) moving through the lifecycle:
//!
//! ```text
//! queued -> claimed -> delivering -> posted
//!    |          |           |------> failed  -> posted (reconciliation)
//!    |          |           |------> queued  (re-queue with backoff)
//!    |          |---------> queued  (released before delivery)
//!    |--------> duplicate
//! ```
//!
//! The store is the coordination point between processes: claiming uses
//! conditional updates so exactly one worker wins a decision, and every
//! transition is checked against the table above. Two implementations
//! share the same semantics: [`PgStore`] for production and
//! [`MemoryStore`] for hermetic tests.

pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod schema;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::limiter::OpClass;

pub use memory::MemoryStore;
pub use migrations::{AppliedMigration, MigrationError, MigrationRunner};
pub use postgres::PgStore;

/// Default maximum delivery attempts for a decision.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failed to connect to the database.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The requested decision does not exist.
    #[error("Decision {0} not found")]
    NotFound(Uuid),

    /// Payload serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored status string is not a known status.
    #[error("Unknown decision status '{0}'")]
    InvalidStatus(String),

    /// A stored kind string is not a known kind.
    #[error("Unknown decision kind '{0}'")]
    InvalidKind(String),
}

/// Lifecycle states of a posting decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    /// Waiting for its scheduled time.
    Queued,
    /// Claimed by a worker, not yet delivering.
    Claimed,
    /// Delivery through a browser session is in progress.
    Delivering,
    /// Confirmed on the platform.
    Posted,
    /// All attempts exhausted without confirmation.
    Failed,
    /// Matched a recently posted fingerprint; never delivered.
    Duplicate,
}

impl DecisionStatus {
    /// All states, in lifecycle order.
    pub fn all() -> &'static [DecisionStatus] {
        &[
            DecisionStatus::Queued,
            DecisionStatus::Claimed,
            DecisionStatus::Delivering,
            DecisionStatus::Posted,
            DecisionStatus::Failed,
            DecisionStatus::Duplicate,
        ]
    }

    /// The states this state may legally transition to.
    pub fn valid_transitions(&self) -> &'static [DecisionStatus] {
        match self {
            DecisionStatus::Queued => &[DecisionStatus::Claimed, DecisionStatus::Duplicate],
            DecisionStatus::Claimed => &[DecisionStatus::Delivering, DecisionStatus::Queued],
            DecisionStatus::Delivering => &[
                DecisionStatus::Posted,
                DecisionStatus::Failed,
                DecisionStatus::Queued,
            ],
            // Reconciliation may correct failed to posted; never the reverse.
            DecisionStatus::Failed => &[DecisionStatus::Posted],
            DecisionStatus::Posted => &[],
            DecisionStatus::Duplicate => &[],
        }
    }

    /// Whether `next` is a legal transition from this state.
    pub fn can_transition_to(&self, next: DecisionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    /// Whether this state can never change again.
    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Queued => "queued",
            DecisionStatus::Claimed => "claimed",
            DecisionStatus::Delivering => "delivering",
            DecisionStatus::Posted => "posted",
            DecisionStatus::Failed => "failed",
            DecisionStatus::Duplicate => "duplicate",
        }
    }

    /// Parse a database representation.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "queued" => Ok(DecisionStatus::Queued),
            "claimed" => Ok(DecisionStatus::Claimed),
            "delivering" => Ok(DecisionStatus::Delivering),
            "posted" => Ok(DecisionStatus::Posted),
            "failed" => Ok(DecisionStatus::Failed),
            "duplicate" => Ok(DecisionStatus::Duplicate),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The shape of content a decision carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    /// One standalone post.
    Single,
    /// An ordered chain of posts, each replying to the previous.
    Thread,
    /// A reply to an existing platform post.
    Reply,
}

impl DecisionKind {
    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionKind::Single => "single",
            DecisionKind::Thread => "thread",
            DecisionKind::Reply => "reply",
        }
    }

    /// Parse a database representation.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "single" => Ok(DecisionKind::Single),
            "thread" => Ok(DecisionKind::Thread),
            "reply" => Ok(DecisionKind::Reply),
            other => Err(StoreError::InvalidKind(other.to_string())),
        }
    }
}

impl fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Content of a decision, stored as JSONB.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Single { text: String },
    Thread { parts: Vec<String> },
    Reply { target: String, text: String },
}

impl Payload {
    /// The decision kind this payload implies.
    pub fn kind(&self) -> DecisionKind {
        match self {
            Payload::Single { .. } => DecisionKind::Single,
            Payload::Thread { .. } => DecisionKind::Thread,
            Payload::Reply { .. } => DecisionKind::Reply,
        }
    }

    /// The text parts in delivery order.
    pub fn parts(&self) -> Vec<String> {
        match self {
            Payload::Single { text } => vec![text.clone()],
            Payload::Thread { parts } => parts.clone(),
            Payload::Reply { text, .. } => vec![text.clone()],
        }
    }

    /// The first part, used for verification probes and log lines.
    pub fn lead_text(&self) -> &str {
        match self {
            Payload::Single { text } => text,
            Payload::Thread { parts } => parts.first().map(String::as_str).unwrap_or(""),
            Payload::Reply { text, .. } => text,
        }
    }

    /// Number of parts to deliver.
    pub fn part_count(&self) -> usize {
        match self {
            Payload::Single { .. } | Payload::Reply { .. } => 1,
            Payload::Thread { parts } => parts.len(),
        }
    }

    /// The platform post this payload replies to, if any.
    pub fn reply_target(&self) -> Option<&str> {
        match self {
            Payload::Reply { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// A persisted posting decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Unique decision id.
    pub id: Uuid,
    /// Shape of the content.
    pub kind: DecisionKind,
    /// The content itself.
    pub payload: Payload,
    /// Normalized content fingerprint for dedup and verification.
    pub fingerprint: String,
    /// Current lifecycle state.
    pub status: DecisionStatus,
    /// Earliest time the decision may be delivered.
    pub scheduled_at: DateTime<Utc>,
    /// Delivery attempts started so far.
    pub attempt_count: i32,
    /// Attempts allowed before the decision fails.
    pub max_attempts: i32,
    /// Error from the most recent attempt, if any.
    pub last_error: Option<String>,
    /// Platform id of the published post (root part for threads).
    pub external_id: Option<String>,
    /// When the decision was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the decision last changed.
    pub updated_at: DateTime<Utc>,
}

impl Decision {
    /// Whether every allowed attempt has been started.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }
}

/// A decision about to be enqueued.
#[derive(Debug, Clone)]
pub struct NewDecision {
    /// The content to deliver.
    pub payload: Payload,
    /// Earliest delivery time.
    pub scheduled_at: DateTime<Utc>,
    /// Attempts allowed.
    pub max_attempts: i32,
}

impl NewDecision {
    /// Creates a decision scheduled for immediate delivery with the
    /// default attempt budget.
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            scheduled_at: Utc::now(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Builder method to set the scheduled time.
    pub fn with_scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = at;
        self
    }

    /// Builder method to set the attempt budget.
    pub fn with_max_attempts(mut self, max: i32) -> Self {
        self.max_attempts = max;
        self
    }

    /// The content fingerprint this decision will carry.
    pub fn fingerprint(&self) -> String {
        crate::fingerprint::fingerprint(&self.payload.parts())
    }
}

/// Persisted health record of a scheduler job.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct JobHeartbeat {
    /// Job name.
    pub name: String,
    /// When the job last ran (any outcome).
    pub last_run: Option<DateTime<Utc>>,
    /// When the job last succeeded.
    pub last_success: Option<DateTime<Utc>>,
    /// Error from the most recent failed run.
    pub last_error: Option<String>,
    /// Failed runs since the last success.
    pub consecutive_failures: i32,
    /// When this record last changed.
    pub updated_at: DateTime<Utc>,
}

impl JobHeartbeat {
    /// Creates an empty heartbeat for a job.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_run: None,
            last_success: None,
            last_error: None,
            consecutive_failures: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Persisted circuit breaker state.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BreakerRecord {
    /// Breaker name (one per guarded path).
    pub name: String,
    /// State as stored: `closed`, `open` or `half_open`.
    pub state: String,
    /// Consecutive failures while closed.
    pub failure_streak: i32,
    /// Consecutive successes while half-open.
    pub success_streak: i32,
    /// When the breaker last opened.
    pub opened_at: Option<DateTime<Utc>>,
    /// When this record last changed.
    pub updated_at: DateTime<Utc>,
}

/// Engagement numbers scraped for a published post.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct EngagementSnapshot {
    pub impressions: i64,
    pub likes: i32,
    pub replies: i32,
    pub reposts: i32,
}

/// Decision totals per lifecycle state.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DecisionCounts {
    pub queued: u64,
    pub claimed: u64,
    pub delivering: u64,
    pub posted: u64,
    pub failed: u64,
    pub duplicate: u64,
}

impl DecisionCounts {
    /// Total decisions across all states.
    pub fn total(&self) -> u64 {
        self.queued + self.claimed + self.delivering + self.posted + self.failed + self.duplicate
    }

    /// The bucket for `status`.
    pub fn count_for(&self, status: DecisionStatus) -> u64 {
        match status {
            DecisionStatus::Queued => self.queued,
            DecisionStatus::Claimed => self.claimed,
            DecisionStatus::Delivering => self.delivering,
            DecisionStatus::Posted => self.posted,
            DecisionStatus::Failed => self.failed,
            DecisionStatus::Duplicate => self.duplicate,
        }
    }

    /// Add one to the bucket for `status`.
    pub fn bump(&mut self, status: DecisionStatus, by: u64) {
        match status {
            DecisionStatus::Queued => self.queued += by,
            DecisionStatus::Claimed => self.claimed += by,
            DecisionStatus::Delivering => self.delivering += by,
            DecisionStatus::Posted => self.posted += by,
            DecisionStatus::Failed => self.failed += by,
            DecisionStatus::Duplicate => self.duplicate += by,
        }
    }
}

/// Persistence operations shared by the Postgres and in-memory stores.
///
/// All state transitions are conditional: they apply only when the decision
/// is currently in a state the transition table allows, and report whether
/// they took effect. A `false` return means another worker got there first
/// and the caller should move on.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new decision in `queued` state and return the stored row.
    async fn enqueue(&self, new: NewDecision) -> Result<Decision, StoreError>;

    /// Fetch a decision by id.
    async fn get(&self, id: Uuid) -> Result<Decision, StoreError>;

    /// Queued decisions whose scheduled time is within `grace` of now,
    /// oldest scheduled first, at most `limit`.
    async fn fetch_ready(&self, limit: i64, grace: Duration) -> Result<Vec<Decision>, StoreError>;

    /// Atomically claim a queued decision. Returns `false` when the
    /// decision was not in `queued` state (lost race or already settled).
    async fn try_claim(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Move a claimed decision to `delivering` and start an attempt
    /// (increments `attempt_count`).
    async fn mark_delivering(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Return a claimed or delivering decision to `queued` without
    /// consuming an attempt. Used when a gate (rate, breaker, pool)
    /// refuses the decision before delivery started.
    async fn release_to_queued(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Return a delivering decision to `queued` after a failed attempt,
    /// recording the error and the backoff-adjusted schedule time.
    async fn requeue_with_backoff(
        &self,
        id: Uuid,
        error: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Move a delivering decision to `posted` with its platform id.
    async fn mark_posted(&self, id: Uuid, external_id: &str) -> Result<bool, StoreError>;

    /// Move a delivering decision to `failed`, recording the final error.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool, StoreError>;

    /// Move a queued decision to `duplicate`.
    async fn mark_duplicate(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Correct a failed decision to `posted` with platform evidence.
    /// This is the only edge out of `failed`; `posted` is never reversed.
    async fn reconcile_posted(&self, id: Uuid, external_id: &str) -> Result<bool, StoreError>;

    /// Return decisions stuck in `claimed` or `delivering` longer than
    /// `older_than` to `queued`. Covers workers that died between claiming
    /// and settling; an attempt that started stays counted. Returns how
    /// many were recovered.
    async fn recover_stuck(&self, older_than: Duration) -> Result<u64, StoreError>;

    /// The most recent decision carrying `fingerprint` that reached
    /// `posted` or `delivering` within `lookback`, if any.
    async fn find_recent_fingerprint(
        &self,
        fingerprint: &str,
        lookback: Duration,
    ) -> Result<Option<Decision>, StoreError>;

    /// Failed decisions updated within `lookback`, most recent first.
    async fn failed_since(&self, lookback: Duration, limit: i64)
        -> Result<Vec<Decision>, StoreError>;

    /// Posted decisions updated within `lookback`, most recent first.
    async fn recently_posted(
        &self,
        lookback: Duration,
        limit: i64,
    ) -> Result<Vec<Decision>, StoreError>;

    /// Decision totals per state.
    async fn status_counts(&self) -> Result<DecisionCounts, StoreError>;

    /// Upsert a job heartbeat.
    async fn save_heartbeat(&self, heartbeat: &JobHeartbeat) -> Result<(), StoreError>;

    /// All persisted job heartbeats.
    async fn load_heartbeats(&self) -> Result<Vec<JobHeartbeat>, StoreError>;

    /// Load persisted breaker state by name.
    async fn load_breaker(&self, name: &str) -> Result<Option<BreakerRecord>, StoreError>;

    /// Upsert breaker state.
    async fn save_breaker(&self, record: &BreakerRecord) -> Result<(), StoreError>;

    /// Record one rate-limited operation at `at`.
    async fn record_rate_event(&self, class: OpClass, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Rate events for `class` at or after `since`, oldest first.
    async fn load_rate_events(
        &self,
        class: OpClass,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, StoreError>;

    /// Delete rate events older than `cutoff`; returns how many went.
    async fn prune_rate_events(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Store one engagement snapshot for a published post.
    async fn record_post_metrics(
        &self,
        decision_id: Uuid,
        external_id: &str,
        snapshot: &EngagementSnapshot,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queued_transitions() {
        let queued = DecisionStatus::Queued;
        assert!(queued.can_transition_to(DecisionStatus::Claimed));
        assert!(queued.can_transition_to(DecisionStatus::Duplicate));
        assert!(!queued.can_transition_to(DecisionStatus::Delivering));
        assert!(!queued.can_transition_to(DecisionStatus::Posted));
    }

    #[test]
    fn test_claimed_can_release_or_deliver() {
        let claimed = DecisionStatus::Claimed;
        assert!(claimed.can_transition_to(DecisionStatus::Delivering));
        assert!(claimed.can_transition_to(DecisionStatus::Queued));
        assert!(!claimed.can_transition_to(DecisionStatus::Posted));
        assert!(!claimed.can_transition_to(DecisionStatus::Failed));
    }

    #[test]
    fn test_delivering_outcomes() {
        let delivering = DecisionStatus::Delivering;
        assert!(delivering.can_transition_to(DecisionStatus::Posted));
        assert!(delivering.can_transition_to(DecisionStatus::Failed));
        assert!(delivering.can_transition_to(DecisionStatus::Queued));
        assert!(!delivering.can_transition_to(DecisionStatus::Duplicate));
    }

    #[test]
    fn test_failed_only_corrects_to_posted() {
        let failed = DecisionStatus::Failed;
        assert!(failed.can_transition_to(DecisionStatus::Posted));
        assert!(!failed.can_transition_to(DecisionStatus::Queued));
        assert!(!failed.can_transition_to(DecisionStatus::Delivering));
    }

    #[test]
    fn test_posted_is_never_reversed() {
        let posted = DecisionStatus::Posted;
        for next in DecisionStatus::all() {
            assert!(!posted.can_transition_to(*next));
        }
        assert!(posted.is_terminal());
        assert!(DecisionStatus::Duplicate.is_terminal());
        assert!(!DecisionStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in DecisionStatus::all() {
            assert_eq!(DecisionStatus::parse(status.as_str()).unwrap(), *status);
        }
        assert!(DecisionStatus::parse("bogus").is_err());
    }

    #[test]
    fn test_payload_kind_and_parts() {
        let single = Payload::Single {
            text: "hello".to_string(),
        };
        assert_eq!(single.kind(), DecisionKind::Single);
        assert_eq!(single.parts(), vec!["hello".to_string()]);
        assert_eq!(single.part_count(), 1);
        assert!(single.reply_target().is_none());

        let thread = Payload::Thread {
            parts: vec!["one".to_string(), "two".to_string()],
        };
        assert_eq!(thread.kind(), DecisionKind::Thread);
        assert_eq!(thread.part_count(), 2);
        assert_eq!(thread.lead_text(), "one");

        let reply = Payload::Reply {
            target: "10001".to_string(),
            text: "agreed".to_string(),
        };
        assert_eq!(reply.kind(), DecisionKind::Reply);
        assert_eq!(reply.reply_target(), Some("10001"));
    }

    #[test]
    fn test_payload_serde_tag() {
        let payload = Payload::Thread {
            parts: vec!["a".to_string(), "b".to_string()],
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "thread");
        assert_eq!(json["parts"][1], "b");

        let back: Payload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_new_decision_defaults() {
        let new = NewDecision::new(Payload::Single {
            text: "post".to_string(),
        });
        assert_eq!(new.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(!new.fingerprint().is_empty());

        let later = Utc::now() + chrono::Duration::minutes(10);
        let new = new.with_scheduled_at(later).with_max_attempts(5);
        assert_eq!(new.scheduled_at, later);
        assert_eq!(new.max_attempts, 5);
    }

    #[test]
    fn test_decision_counts() {
        let mut counts = DecisionCounts::default();
        counts.bump(DecisionStatus::Queued, 3);
        counts.bump(DecisionStatus::Posted, 2);
        counts.bump(DecisionStatus::Failed, 1);
        assert_eq!(counts.queued, 3);
        assert_eq!(counts.posted, 2);
        assert_eq!(counts.total(), 6);
    }
}
