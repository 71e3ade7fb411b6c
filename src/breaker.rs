//! Circuit breaker guarding the delivery path.
//!
//! The breaker watches consecutive attempt outcomes. While closed it only
//! counts; when the failure streak reaches the threshold it opens and all
//! delivery is rejected without touching the session pool. After the
//! cooldown the first check flips it half-open and admits probes; a probe
//! failure re-opens it, enough probe successes close it again.
//!
//! State lives in atomics so recording an outcome never blocks delivery.
//! The owner persists a [`BreakerRecord`] after outcomes and hydrates it
//! at startup, so an open breaker survives a process restart.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::OutpostConfig;
use crate::store::BreakerRecord;

/// Name of the breaker guarding the delivery path.
pub const DELIVERY_BREAKER: &str = "delivery";

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => BreakerState::Open,
            STATE_HALF_OPEN => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }

    /// Numeric code exported on the breaker state gauge.
    pub fn as_u8(&self) -> u8 {
        match self {
            BreakerState::Closed => STATE_CLOSED,
            BreakerState::Open => STATE_OPEN,
            BreakerState::HalfOpen => STATE_HALF_OPEN,
        }
    }

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }

    /// Parse a database representation; unknown strings read as closed.
    pub fn parse(s: &str) -> Self {
        match s {
            "open" => BreakerState::Open,
            "half_open" => BreakerState::HalfOpen,
            _ => BreakerState::Closed,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The breaker is open and the cooldown has not elapsed.
#[derive(Debug, Error)]
#[error("Circuit open: delivery suspended, retry in {retry_after:?}")]
pub struct CircuitOpen {
    /// Time until a probe will be admitted.
    pub retry_after: Duration,
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_streak: u32,
    pub success_streak: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Consecutive-failure circuit breaker.
pub struct CircuitBreaker {
    state: AtomicU8,
    failure_streak: AtomicU32,
    success_streak: AtomicU32,
    /// Epoch millis of the last open transition; 0 = never opened.
    opened_at_ms: AtomicI64,
    failure_threshold: u32,
    success_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    pub fn new(failure_threshold: u32, success_threshold: u32, cooldown: Duration) -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_streak: AtomicU32::new(0),
            success_streak: AtomicU32::new(0),
            opened_at_ms: AtomicI64::new(0),
            failure_threshold,
            success_threshold,
            cooldown,
        }
    }

    /// Creates a breaker with the configured thresholds.
    pub fn from_config(config: &OutpostConfig) -> Self {
        Self::new(
            config.breaker_failure_threshold,
            config.breaker_success_threshold,
            config.breaker_cooldown,
        )
    }

    /// Gate an attempt.
    ///
    /// Closed and half-open admit. Open rejects with the remaining
    /// cooldown, except that the first check after the cooldown elapses
    /// flips the breaker half-open and admits the probe; that flip is
    /// reported as `Some(BreakerState::HalfOpen)` so the caller can record
    /// the transition.
    ///
    /// # Errors
    ///
    /// Returns `CircuitOpen` while the breaker is open and cooling down.
    pub fn check(&self) -> Result<Option<BreakerState>, CircuitOpen> {
        match BreakerState::from_u8(self.state.load(Ordering::SeqCst)) {
            BreakerState::Closed | BreakerState::HalfOpen => Ok(None),
            BreakerState::Open => {
                let elapsed = self.elapsed_since_open();
                if elapsed >= self.cooldown {
                    // Only one caller wins the flip; the rest see half-open.
                    let flipped = self
                        .state
                        .compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok();
                    if flipped {
                        self.success_streak.store(0, Ordering::SeqCst);
                        tracing::info!("Circuit half-open, admitting probe delivery");
                        Ok(Some(BreakerState::HalfOpen))
                    } else {
                        Ok(None)
                    }
                } else {
                    Err(CircuitOpen {
                        retry_after: self.cooldown - elapsed,
                    })
                }
            }
        }
    }

    /// Record a confirmed successful attempt.
    ///
    /// Returns the new state when this outcome caused a transition.
    pub fn record_success(&self) -> Option<BreakerState> {
        match BreakerState::from_u8(self.state.load(Ordering::SeqCst)) {
            BreakerState::Closed => {
                self.failure_streak.store(0, Ordering::SeqCst);
                None
            }
            BreakerState::HalfOpen => {
                let streak = self.success_streak.fetch_add(1, Ordering::SeqCst) + 1;
                if streak >= self.success_threshold {
                    self.state.store(STATE_CLOSED, Ordering::SeqCst);
                    self.failure_streak.store(0, Ordering::SeqCst);
                    self.success_streak.store(0, Ordering::SeqCst);
                    tracing::info!(
                        probes = streak,
                        "Circuit closed after successful probe deliveries"
                    );
                    Some(BreakerState::Closed)
                } else {
                    None
                }
            }
            // A success landing after the breaker opened changes nothing.
            BreakerState::Open => None,
        }
    }

    /// Record a confirmed failed attempt.
    ///
    /// Returns the new state when this outcome caused a transition.
    pub fn record_failure(&self) -> Option<BreakerState> {
        match BreakerState::from_u8(self.state.load(Ordering::SeqCst)) {
            BreakerState::Closed => {
                let streak = self.failure_streak.fetch_add(1, Ordering::SeqCst) + 1;
                if streak >= self.failure_threshold {
                    self.open_now();
                    tracing::warn!(
                        consecutive_failures = streak,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Circuit opened after consecutive delivery failures"
                    );
                    Some(BreakerState::Open)
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                self.open_now();
                tracing::warn!(
                    cooldown_secs = self.cooldown.as_secs(),
                    "Probe delivery failed, circuit re-opened"
                );
                Some(BreakerState::Open)
            }
            BreakerState::Open => None,
        }
    }

    /// Current state.
    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Point-in-time view for status reports and persistence.
    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            state: self.state(),
            failure_streak: self.failure_streak.load(Ordering::SeqCst),
            success_streak: self.success_streak.load(Ordering::SeqCst),
            opened_at: self.opened_at(),
        }
    }

    /// The persistable record of the current state.
    pub fn to_record(&self, name: &str) -> BreakerRecord {
        let snapshot = self.snapshot();
        BreakerRecord {
            name: name.to_string(),
            state: snapshot.state.as_str().to_string(),
            failure_streak: snapshot.failure_streak as i32,
            success_streak: snapshot.success_streak as i32,
            opened_at: snapshot.opened_at,
            updated_at: Utc::now(),
        }
    }

    /// Restore state from a persisted record.
    pub fn hydrate(&self, record: &BreakerRecord) {
        let state = BreakerState::parse(&record.state);
        self.state.store(state.as_u8(), Ordering::SeqCst);
        self.failure_streak
            .store(record.failure_streak.max(0) as u32, Ordering::SeqCst);
        self.success_streak
            .store(record.success_streak.max(0) as u32, Ordering::SeqCst);
        self.opened_at_ms.store(
            record.opened_at.map(|t| t.timestamp_millis()).unwrap_or(0),
            Ordering::SeqCst,
        );
        tracing::info!(state = %state, "Circuit breaker state hydrated");
    }

    fn open_now(&self) {
        self.state.store(STATE_OPEN, Ordering::SeqCst);
        self.success_streak.store(0, Ordering::SeqCst);
        self.opened_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn opened_at(&self) -> Option<DateTime<Utc>> {
        let ms = self.opened_at_ms.load(Ordering::SeqCst);
        if ms == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(ms).single()
    }

    fn elapsed_since_open(&self) -> Duration {
        let ms = self.opened_at_ms.load(Ordering::SeqCst);
        let elapsed_ms = Utc::now().timestamp_millis().saturating_sub(ms);
        Duration::from_millis(elapsed_ms.max(0) as u64)
    }
}
