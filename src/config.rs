//! Configuration for the outpost orchestrator.
//!
//! This module provides configuration options for the posting orchestrator,
//! including pool sizing, delivery deadlines, retry and backoff policy,
//! rate ceilings, circuit breaker thresholds, and job scheduling intervals.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the posting orchestrator.
#[derive(Debug, Clone)]
pub struct OutpostConfig {
    // Storage settings
    /// PostgreSQL database connection URL.
    pub database_url: String,

    // Bridge settings
    /// Base URL of the browser automation bridge.
    pub bridge_url: String,
    /// Bearer token for the bridge, if it requires one.
    pub bridge_token: Option<String>,
    /// Base URL of the content generation service. Generation is disabled
    /// when unset.
    pub generator_url: Option<String>,

    // Operating mode
    /// Live mode: the scheduler refuses to start without the critical
    /// delivery job and the process exits non-zero if it is missing.
    pub live: bool,

    // Pool settings
    /// Number of browser sessions in the pool.
    pub pool_capacity: usize,
    /// Maximum time a request may wait in the pool queue for a slot.
    pub acquire_timeout: Duration,
    /// A slot busy longer than this is considered stuck and is forcibly
    /// recycled by the health check.
    pub session_grace: Duration,

    // Delivery settings
    /// Deadline for delivering a single post or reply.
    pub post_timeout: Duration,
    /// Per-part deadline when delivering a thread.
    pub part_timeout: Duration,
    /// How far back platform evidence counts during verification.
    pub verify_window: Duration,
    /// Maximum delivery attempts per decision.
    pub max_attempts: u32,
    /// Delay before each re-queue, indexed by attempts already made.
    /// The last entry repeats when attempts exceed the schedule length.
    pub backoff_schedule: Vec<Duration>,

    // Rate ceilings (rolling one-hour windows)
    /// Maximum deliveries per hour.
    pub posts_per_hour: usize,
    /// Maximum metric scrapes per hour.
    pub scrapes_per_hour: usize,
    /// Maximum discovery operations per hour.
    pub discoveries_per_hour: usize,

    // Circuit breaker settings
    /// Consecutive delivery failures that open the breaker.
    pub breaker_failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe.
    pub breaker_cooldown: Duration,
    /// Consecutive half-open successes that close the breaker.
    pub breaker_success_threshold: u32,

    // Pipeline settings
    /// Maximum decisions claimed per posting tick.
    pub claim_batch: i64,
    /// Decisions scheduled up to this far in the future are considered ready.
    pub claim_grace: Duration,
    /// How far back fingerprints are compared for duplicate detection.
    pub dedup_lookback: Duration,
    /// How far back failed decisions are re-examined by reconciliation.
    pub reconcile_lookback: Duration,
    /// The generation job only produces content when fewer queued
    /// decisions than this remain.
    pub min_queue_depth: u64,

    // Scheduler settings
    /// Busy-slot fraction at or above which non-critical jobs skip a tick.
    pub pressure_threshold: f64,
    /// A dependency is healthy if its last success is within this factor
    /// times its own interval.
    pub dependency_staleness_factor: u32,
    /// Interval of the posting job.
    pub posting_interval: Duration,
    /// Interval of the reconciliation job.
    pub reconcile_interval: Duration,
    /// Interval of the content generation job.
    pub generation_interval: Duration,
    /// Interval of the engagement scrape job.
    pub scrape_interval: Duration,
    /// Interval of the pool health check job.
    pub health_interval: Duration,
    /// Interval of the maintenance job.
    pub maintenance_interval: Duration,
    /// Upper bound on the random startup stagger applied to each job.
    pub max_stagger: Duration,
    /// Grace period for jobs to finish during shutdown.
    pub shutdown_timeout: Duration,

    // Payload limits
    /// Maximum characters per post part.
    pub max_part_chars: usize,
    /// Maximum parts per thread.
    pub max_thread_parts: usize,
}

impl Default for OutpostConfig {
    fn default() -> Self {
        Self {
            // Storage defaults
            database_url: "postgres://localhost/outpost".to_string(),

            // Bridge defaults
            bridge_url: "http://127.0.0.1:4444".to_string(),
            bridge_token: None,
            generator_url: None,

            // Mode defaults
            live: false,

            // Pool defaults
            pool_capacity: 3,
            acquire_timeout: Duration::from_secs(60),
            session_grace: Duration::from_secs(600),

            // Delivery defaults
            post_timeout: Duration::from_secs(45),
            part_timeout: Duration::from_secs(30),
            verify_window: Duration::from_secs(300),
            max_attempts: 3,
            backoff_schedule: vec![
                Duration::from_secs(300),
                Duration::from_secs(900),
                Duration::from_secs(1800),
            ],

            // Rate defaults
            posts_per_hour: 8,
            scrapes_per_hour: 120,
            discoveries_per_hour: 60,

            // Breaker defaults
            breaker_failure_threshold: 15,
            breaker_cooldown: Duration::from_secs(60),
            breaker_success_threshold: 3,

            // Pipeline defaults
            claim_batch: 5,
            claim_grace: Duration::from_secs(30),
            dedup_lookback: Duration::from_secs(48 * 3600),
            reconcile_lookback: Duration::from_secs(24 * 3600),
            min_queue_depth: 2,

            // Scheduler defaults
            pressure_threshold: 1.0,
            dependency_staleness_factor: 3,
            posting_interval: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(4 * 3600),
            generation_interval: Duration::from_secs(3600),
            scrape_interval: Duration::from_secs(900),
            health_interval: Duration::from_secs(120),
            maintenance_interval: Duration::from_secs(3600),
            max_stagger: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(20),

            // Payload defaults
            max_part_chars: 280,
            max_thread_parts: 12,
        }
    }
}

impl OutpostConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection URL (required)
    /// - `OUTPOST_BRIDGE_URL`: Browser bridge base URL (default: http://127.0.0.1:4444)
    /// - `OUTPOST_BRIDGE_TOKEN`: Bearer token for the bridge
    /// - `OUTPOST_GENERATOR_URL`: Content generator base URL (generation off when unset)
    /// - `OUTPOST_LIVE`: Live mode (default: false)
    /// - `OUTPOST_POOL_CAPACITY`: Browser sessions in the pool (default: 3)
    /// - `OUTPOST_ACQUIRE_TIMEOUT_SECS`: Slot queue wait limit (default: 60)
    /// - `OUTPOST_SESSION_GRACE_SECS`: Busy time before forcible recycle (default: 600)
    /// - `OUTPOST_POST_TIMEOUT_SECS`: Single delivery deadline (default: 45)
    /// - `OUTPOST_PART_TIMEOUT_SECS`: Per-part thread deadline (default: 30)
    /// - `OUTPOST_VERIFY_WINDOW_SECS`: Verification evidence window (default: 300)
    /// - `OUTPOST_MAX_ATTEMPTS`: Delivery attempts per decision (default: 3)
    /// - `OUTPOST_BACKOFF_SCHEDULE`: Comma-separated re-queue delays in seconds
    ///   (default: 300,900,1800)
    /// - `OUTPOST_POSTS_PER_HOUR`: Delivery ceiling (default: 8)
    /// - `OUTPOST_SCRAPES_PER_HOUR`: Scrape ceiling (default: 120)
    /// - `OUTPOST_DISCOVERIES_PER_HOUR`: Discovery ceiling (default: 60)
    /// - `OUTPOST_BREAKER_FAILURES`: Failures that open the breaker (default: 15)
    /// - `OUTPOST_BREAKER_COOLDOWN_SECS`: Open-state cooldown (default: 60)
    /// - `OUTPOST_BREAKER_SUCCESSES`: Half-open successes to close (default: 3)
    /// - `OUTPOST_CLAIM_BATCH`: Decisions claimed per tick (default: 5)
    /// - `OUTPOST_CLAIM_GRACE_SECS`: Readiness look-ahead (default: 30)
    /// - `OUTPOST_DEDUP_LOOKBACK_HOURS`: Duplicate detection window (default: 48)
    /// - `OUTPOST_RECONCILE_LOOKBACK_HOURS`: Reconciliation window (default: 24)
    /// - `OUTPOST_MIN_QUEUE_DEPTH`: Generation low-water mark (default: 2)
    /// - `OUTPOST_PRESSURE_THRESHOLD`: Busy fraction that skips non-critical
    ///   jobs (default: 1.0)
    /// - `OUTPOST_DEP_STALENESS_FACTOR`: Dependency health factor (default: 3)
    /// - `OUTPOST_POSTING_INTERVAL_SECS`: Posting job interval (default: 60)
    /// - `OUTPOST_RECONCILE_INTERVAL_SECS`: Reconciliation interval (default: 14400)
    /// - `OUTPOST_GENERATION_INTERVAL_SECS`: Generation interval (default: 3600)
    /// - `OUTPOST_SCRAPE_INTERVAL_SECS`: Scrape interval (default: 900)
    /// - `OUTPOST_HEALTH_INTERVAL_SECS`: Pool health interval (default: 120)
    /// - `OUTPOST_MAINTENANCE_INTERVAL_SECS`: Maintenance interval (default: 3600)
    /// - `OUTPOST_MAX_STAGGER_SECS`: Startup stagger bound (default: 30)
    /// - `OUTPOST_SHUTDOWN_TIMEOUT_SECS`: Shutdown grace (default: 20)
    /// - `OUTPOST_MAX_PART_CHARS`: Characters per part (default: 280)
    /// - `OUTPOST_MAX_THREAD_PARTS`: Parts per thread (default: 12)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or have
    /// invalid values.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Storage settings - DATABASE_URL is required
        config.database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;

        // Bridge settings
        if let Ok(val) = std::env::var("OUTPOST_BRIDGE_URL") {
            config.bridge_url = val;
        }

        if let Ok(val) = std::env::var("OUTPOST_BRIDGE_TOKEN") {
            config.bridge_token = Some(val);
        }

        if let Ok(val) = std::env::var("OUTPOST_GENERATOR_URL") {
            config.generator_url = Some(val);
        }

        // Mode settings
        if let Ok(val) = std::env::var("OUTPOST_LIVE") {
            config.live = parse_env_bool(&val, "OUTPOST_LIVE")?;
        }

        // Pool settings
        if let Ok(val) = std::env::var("OUTPOST_POOL_CAPACITY") {
            config.pool_capacity = parse_env_value(&val, "OUTPOST_POOL_CAPACITY")?;
        }

        if let Ok(val) = std::env::var("OUTPOST_ACQUIRE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_ACQUIRE_TIMEOUT_SECS")?;
            config.acquire_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_SESSION_GRACE_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_SESSION_GRACE_SECS")?;
            config.session_grace = Duration::from_secs(secs);
        }

        // Delivery settings
        if let Ok(val) = std::env::var("OUTPOST_POST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_POST_TIMEOUT_SECS")?;
            config.post_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_PART_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_PART_TIMEOUT_SECS")?;
            config.part_timeout = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_VERIFY_WINDOW_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_VERIFY_WINDOW_SECS")?;
            config.verify_window = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "OUTPOST_MAX_ATTEMPTS")?;
        }

        if let Ok(val) = std::env::var("OUTPOST_BACKOFF_SCHEDULE") {
            config.backoff_schedule = parse_backoff_schedule(&val, "OUTPOST_BACKOFF_SCHEDULE")?;
        }

        // Rate settings
        if let Ok(val) = std::env::var("OUTPOST_POSTS_PER_HOUR") {
            config.posts_per_hour = parse_env_value(&val, "OUTPOST_POSTS_PER_HOUR")?;
        }

        if let Ok(val) = std::env::var("OUTPOST_SCRAPES_PER_HOUR") {
            config.scrapes_per_hour = parse_env_value(&val, "OUTPOST_SCRAPES_PER_HOUR")?;
        }

        if let Ok(val) = std::env::var("OUTPOST_DISCOVERIES_PER_HOUR") {
            config.discoveries_per_hour = parse_env_value(&val, "OUTPOST_DISCOVERIES_PER_HOUR")?;
        }

        // Breaker settings
        if let Ok(val) = std::env::var("OUTPOST_BREAKER_FAILURES") {
            config.breaker_failure_threshold = parse_env_value(&val, "OUTPOST_BREAKER_FAILURES")?;
        }

        if let Ok(val) = std::env::var("OUTPOST_BREAKER_COOLDOWN_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_BREAKER_COOLDOWN_SECS")?;
            config.breaker_cooldown = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_BREAKER_SUCCESSES") {
            config.breaker_success_threshold = parse_env_value(&val, "OUTPOST_BREAKER_SUCCESSES")?;
        }

        // Pipeline settings
        if let Ok(val) = std::env::var("OUTPOST_CLAIM_BATCH") {
            config.claim_batch = parse_env_value(&val, "OUTPOST_CLAIM_BATCH")?;
        }

        if let Ok(val) = std::env::var("OUTPOST_CLAIM_GRACE_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_CLAIM_GRACE_SECS")?;
            config.claim_grace = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_DEDUP_LOOKBACK_HOURS") {
            let hours: u64 = parse_env_value(&val, "OUTPOST_DEDUP_LOOKBACK_HOURS")?;
            config.dedup_lookback = Duration::from_secs(hours * 3600);
        }

        if let Ok(val) = std::env::var("OUTPOST_RECONCILE_LOOKBACK_HOURS") {
            let hours: u64 = parse_env_value(&val, "OUTPOST_RECONCILE_LOOKBACK_HOURS")?;
            config.reconcile_lookback = Duration::from_secs(hours * 3600);
        }

        if let Ok(val) = std::env::var("OUTPOST_MIN_QUEUE_DEPTH") {
            config.min_queue_depth = parse_env_value(&val, "OUTPOST_MIN_QUEUE_DEPTH")?;
        }

        // Scheduler settings
        if let Ok(val) = std::env::var("OUTPOST_PRESSURE_THRESHOLD") {
            config.pressure_threshold = parse_env_value(&val, "OUTPOST_PRESSURE_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("OUTPOST_DEP_STALENESS_FACTOR") {
            config.dependency_staleness_factor =
                parse_env_value(&val, "OUTPOST_DEP_STALENESS_FACTOR")?;
        }

        if let Ok(val) = std::env::var("OUTPOST_POSTING_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_POSTING_INTERVAL_SECS")?;
            config.posting_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_RECONCILE_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_RECONCILE_INTERVAL_SECS")?;
            config.reconcile_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_GENERATION_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_GENERATION_INTERVAL_SECS")?;
            config.generation_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_SCRAPE_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_SCRAPE_INTERVAL_SECS")?;
            config.scrape_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_HEALTH_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_HEALTH_INTERVAL_SECS")?;
            config.health_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_MAINTENANCE_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_MAINTENANCE_INTERVAL_SECS")?;
            config.maintenance_interval = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_MAX_STAGGER_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_MAX_STAGGER_SECS")?;
            config.max_stagger = Duration::from_secs(secs);
        }

        if let Ok(val) = std::env::var("OUTPOST_SHUTDOWN_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "OUTPOST_SHUTDOWN_TIMEOUT_SECS")?;
            config.shutdown_timeout = Duration::from_secs(secs);
        }

        // Payload settings
        if let Ok(val) = std::env::var("OUTPOST_MAX_PART_CHARS") {
            config.max_part_chars = parse_env_value(&val, "OUTPOST_MAX_PART_CHARS")?;
        }

        if let Ok(val) = std::env::var("OUTPOST_MAX_THREAD_PARTS") {
            config.max_thread_parts = parse_env_value(&val, "OUTPOST_MAX_THREAD_PARTS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.bridge_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "bridge_url cannot be empty".to_string(),
            ));
        }

        if self.pool_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool_capacity must be greater than 0".to_string(),
            ));
        }

        if self.acquire_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "acquire_timeout must be greater than 0".to_string(),
            ));
        }

        if self.post_timeout.as_secs() == 0 || self.part_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "delivery timeouts must be greater than 0".to_string(),
            ));
        }

        // A lease busy past the grace period is treated as wedged and
        // reclaimed, so the grace must cover the longest legitimate
        // delivery.
        if self.session_grace <= self.delivery_deadline(self.max_thread_parts) {
            return Err(ConfigError::ValidationFailed(
                "session_grace must exceed the delivery deadline for a maximum-length thread"
                    .to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be greater than 0".to_string(),
            ));
        }

        if self.backoff_schedule.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "backoff_schedule cannot be empty".to_string(),
            ));
        }

        if self.posts_per_hour == 0 || self.scrapes_per_hour == 0 || self.discoveries_per_hour == 0
        {
            return Err(ConfigError::ValidationFailed(
                "rate ceilings must be greater than 0".to_string(),
            ));
        }

        if self.breaker_failure_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "breaker_failure_threshold must be greater than 0".to_string(),
            ));
        }

        if self.breaker_success_threshold == 0 {
            return Err(ConfigError::ValidationFailed(
                "breaker_success_threshold must be greater than 0".to_string(),
            ));
        }

        if self.claim_batch <= 0 {
            return Err(ConfigError::ValidationFailed(
                "claim_batch must be greater than 0".to_string(),
            ));
        }

        if !(self.pressure_threshold > 0.0 && self.pressure_threshold <= 1.0) {
            return Err(ConfigError::ValidationFailed(
                "pressure_threshold must be within (0.0, 1.0]".to_string(),
            ));
        }

        if self.dependency_staleness_factor == 0 {
            return Err(ConfigError::ValidationFailed(
                "dependency_staleness_factor must be greater than 0".to_string(),
            ));
        }

        if self.posting_interval.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "posting_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_part_chars == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_part_chars must be greater than 0".to_string(),
            ));
        }

        if self.max_thread_parts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_thread_parts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Deadline for delivering a payload of `parts` parts.
    ///
    /// Single posts use `post_timeout`; threads get `part_timeout` per part
    /// plus half a part of slack for navigation between parts.
    pub fn delivery_deadline(&self, parts: usize) -> Duration {
        if parts <= 1 {
            self.post_timeout
        } else {
            self.part_timeout * parts as u32 + self.part_timeout / 2
        }
    }

    /// Transport-level timeout for bridge HTTP requests.
    ///
    /// Must exceed every explicit per-call budget (`post_timeout` and
    /// `part_timeout`): a transport error skips verification, so the HTTP
    /// layer may only give up after the caller's own deadline has fired.
    pub fn bridge_request_timeout(&self) -> Duration {
        self.post_timeout.max(self.part_timeout) + Duration::from_secs(5)
    }

    /// Backoff delay before re-queueing after `attempts_made` attempts.
    ///
    /// Indexes the schedule with the number of attempts already made,
    /// clamped to the last entry.
    pub fn backoff_for_attempt(&self, attempts_made: u32) -> Duration {
        let idx = (attempts_made.saturating_sub(1)) as usize;
        let last = self.backoff_schedule.len() - 1;
        self.backoff_schedule[idx.min(last)]
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    /// Builder method to set the bridge URL.
    pub fn with_bridge_url(mut self, url: impl Into<String>) -> Self {
        self.bridge_url = url.into();
        self
    }

    /// Builder method to set the bridge token.
    pub fn with_bridge_token(mut self, token: impl Into<String>) -> Self {
        self.bridge_token = Some(token.into());
        self
    }

    /// Builder method to set the generator URL.
    pub fn with_generator_url(mut self, url: impl Into<String>) -> Self {
        self.generator_url = Some(url.into());
        self
    }

    /// Builder method to set live mode.
    pub fn with_live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    /// Builder method to set pool capacity.
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Builder method to set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Builder method to set the session grace period.
    pub fn with_session_grace(mut self, grace: Duration) -> Self {
        self.session_grace = grace;
        self
    }

    /// Builder method to set the single-post deadline.
    pub fn with_post_timeout(mut self, timeout: Duration) -> Self {
        self.post_timeout = timeout;
        self
    }

    /// Builder method to set the per-part deadline.
    pub fn with_part_timeout(mut self, timeout: Duration) -> Self {
        self.part_timeout = timeout;
        self
    }

    /// Builder method to set the verification window.
    pub fn with_verify_window(mut self, window: Duration) -> Self {
        self.verify_window = window;
        self
    }

    /// Builder method to set maximum attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Builder method to set the backoff schedule.
    pub fn with_backoff_schedule(mut self, schedule: Vec<Duration>) -> Self {
        self.backoff_schedule = schedule;
        self
    }

    /// Builder method to set the delivery ceiling.
    pub fn with_posts_per_hour(mut self, ceiling: usize) -> Self {
        self.posts_per_hour = ceiling;
        self
    }

    /// Builder method to set the scrape ceiling.
    pub fn with_scrapes_per_hour(mut self, ceiling: usize) -> Self {
        self.scrapes_per_hour = ceiling;
        self
    }

    /// Builder method to set the breaker failure threshold.
    pub fn with_breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.breaker_failure_threshold = threshold;
        self
    }

    /// Builder method to set the breaker cooldown.
    pub fn with_breaker_cooldown(mut self, cooldown: Duration) -> Self {
        self.breaker_cooldown = cooldown;
        self
    }

    /// Builder method to set the breaker success threshold.
    pub fn with_breaker_success_threshold(mut self, threshold: u32) -> Self {
        self.breaker_success_threshold = threshold;
        self
    }

    /// Builder method to set the claim batch size.
    pub fn with_claim_batch(mut self, batch: i64) -> Self {
        self.claim_batch = batch;
        self
    }

    /// Builder method to set the claim grace period.
    pub fn with_claim_grace(mut self, grace: Duration) -> Self {
        self.claim_grace = grace;
        self
    }

    /// Builder method to set the dedup lookback.
    pub fn with_dedup_lookback(mut self, lookback: Duration) -> Self {
        self.dedup_lookback = lookback;
        self
    }

    /// Builder method to set the reconcile lookback.
    pub fn with_reconcile_lookback(mut self, lookback: Duration) -> Self {
        self.reconcile_lookback = lookback;
        self
    }

    /// Builder method to set the minimum queue depth.
    pub fn with_min_queue_depth(mut self, depth: u64) -> Self {
        self.min_queue_depth = depth;
        self
    }

    /// Builder method to set the pressure threshold.
    pub fn with_pressure_threshold(mut self, threshold: f64) -> Self {
        self.pressure_threshold = threshold;
        self
    }

    /// Builder method to set the posting interval.
    pub fn with_posting_interval(mut self, interval: Duration) -> Self {
        self.posting_interval = interval;
        self
    }

    /// Builder method to set the maximum startup stagger.
    pub fn with_max_stagger(mut self, stagger: Duration) -> Self {
        self.max_stagger = stagger;
        self
    }

    /// Builder method to set the maximum characters per part.
    pub fn with_max_part_chars(mut self, chars: usize) -> Self {
        self.max_part_chars = chars;
        self
    }

    /// Builder method to set the maximum thread parts.
    pub fn with_max_thread_parts(mut self, parts: usize) -> Self {
        self.max_thread_parts = parts;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse a comma-separated list of seconds into a backoff schedule.
fn parse_backoff_schedule(value: &str, key: &str) -> Result<Vec<Duration>, ConfigError> {
    let mut schedule = Vec::new();
    for entry in value.split(',') {
        let secs: u64 = entry
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("could not parse '{}' as seconds", entry.trim()),
            })?;
        schedule.push(Duration::from_secs(secs));
    }

    if schedule.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "schedule cannot be empty".to_string(),
        });
    }

    Ok(schedule)
}
