//! Sliding-window rate limiting per operation class.
//!
//! Each operation class has a rolling window of recent event timestamps
//! and a ceiling. Admission prunes expired events, checks the ceiling and
//! records the new event under one lock, so concurrent callers can never
//! exceed the ceiling. Events are persisted by the caller and hydrated at
//! startup, so a process restart does not reset the windows.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::OutpostConfig;
use crate::utils::time::to_chrono;

/// Classes of platform operations.
///
/// The class drives both rate ceilings and pool priority: delivery
/// outranks scraping, and scraping outranks discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpClass {
    /// Publishing content (posts, threads, replies).
    Delivery,
    /// Reading engagement numbers for published posts.
    Scrape,
    /// Browsing for content opportunities.
    Discovery,
}

impl OpClass {
    /// All classes, highest priority first.
    pub fn all() -> &'static [OpClass] {
        &[OpClass::Delivery, OpClass::Scrape, OpClass::Discovery]
    }

    /// Pool scheduling priority; lower is served first.
    pub fn priority(&self) -> u8 {
        match self {
            OpClass::Delivery => 0,
            OpClass::Scrape => 1,
            OpClass::Discovery => 2,
        }
    }

    /// Database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OpClass::Delivery => "delivery",
            OpClass::Scrape => "scrape",
            OpClass::Discovery => "discovery",
        }
    }

    /// Parse a database representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "delivery" => Some(OpClass::Delivery),
            "scrape" => Some(OpClass::Scrape),
            "discovery" => Some(OpClass::Discovery),
            _ => None,
        }
    }
}

impl fmt::Display for OpClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The rate window for one class is full.
#[derive(Debug, Error)]
#[error("Rate ceiling reached for {class}: {used}/{ceiling} in the last {window:?}, retry in {retry_after:?}")]
pub struct RateLimitExceeded {
    /// The class that hit its ceiling.
    pub class: OpClass,
    /// Events currently inside the window.
    pub used: usize,
    /// The configured ceiling.
    pub ceiling: usize,
    /// The window length.
    pub window: Duration,
    /// Time until the oldest event leaves the window.
    pub retry_after: Duration,
}

/// Ceiling configuration for one class.
#[derive(Debug, Clone, Copy)]
pub struct RateCeiling {
    /// Maximum events inside the window.
    pub limit: usize,
    /// Window length.
    pub window: Duration,
}

/// Point-in-time usage of one class window.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateUsage {
    pub class: OpClass,
    pub used: usize,
    pub ceiling: usize,
    pub window_secs: u64,
}

/// Sliding-window limiter over all operation classes.
pub struct RateLimiter {
    ceilings: HashMap<OpClass, RateCeiling>,
    windows: Mutex<HashMap<OpClass, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    /// Creates a limiter with explicit ceilings.
    pub fn new(ceilings: HashMap<OpClass, RateCeiling>) -> Self {
        Self {
            ceilings,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a limiter with the configured hourly ceilings.
    pub fn from_config(config: &OutpostConfig) -> Self {
        let hour = Duration::from_secs(3600);
        let mut ceilings = HashMap::new();
        ceilings.insert(
            OpClass::Delivery,
            RateCeiling {
                limit: config.posts_per_hour,
                window: hour,
            },
        );
        ceilings.insert(
            OpClass::Scrape,
            RateCeiling {
                limit: config.scrapes_per_hour,
                window: hour,
            },
        );
        ceilings.insert(
            OpClass::Discovery,
            RateCeiling {
                limit: config.discoveries_per_hour,
                window: hour,
            },
        );
        Self::new(ceilings)
    }

    /// Admit one operation of `class` at `now`, recording it in the window.
    ///
    /// Prune, ceiling check and record happen under a single lock; callers
    /// racing on a nearly full window cannot collectively exceed the
    /// ceiling.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitExceeded` when the window is already at the
    /// ceiling, with the time until the oldest event slides out.
    pub fn try_acquire(
        &self,
        class: OpClass,
        now: DateTime<Utc>,
    ) -> Result<(), RateLimitExceeded> {
        let ceiling = self.ceiling_for(class);
        let mut windows = self.lock_windows();
        let window = windows.entry(class).or_default();
        prune(window, now, ceiling.window);

        if window.len() >= ceiling.limit {
            let retry_after = window
                .front()
                .map(|oldest| {
                    let leaves_at = *oldest + to_chrono(ceiling.window);
                    (leaves_at - now).to_std().unwrap_or_default()
                })
                .unwrap_or_default();

            return Err(RateLimitExceeded {
                class,
                used: window.len(),
                ceiling: ceiling.limit,
                window: ceiling.window,
                retry_after,
            });
        }

        window.push_back(now);
        Ok(())
    }

    /// Load persisted events into the window for `class`.
    ///
    /// Events outside the window at hydration time are dropped; the rest
    /// are kept in order.
    pub fn hydrate(&self, class: OpClass, mut events: Vec<DateTime<Utc>>) {
        let ceiling = self.ceiling_for(class);
        events.sort();

        let mut windows = self.lock_windows();
        let window = windows.entry(class).or_default();
        window.clear();
        window.extend(events);
        prune(window, Utc::now(), ceiling.window);
    }

    /// Current usage of the window for `class`.
    pub fn usage(&self, class: OpClass, now: DateTime<Utc>) -> RateUsage {
        let ceiling = self.ceiling_for(class);
        let mut windows = self.lock_windows();
        let window = windows.entry(class).or_default();
        prune(window, now, ceiling.window);

        RateUsage {
            class,
            used: window.len(),
            ceiling: ceiling.limit,
            window_secs: ceiling.window.as_secs(),
        }
    }

    /// Usage for every class, highest priority first.
    pub fn usage_all(&self, now: DateTime<Utc>) -> Vec<RateUsage> {
        OpClass::all()
            .iter()
            .map(|class| self.usage(*class, now))
            .collect()
    }

    /// The longest configured window; events older than this are inert
    /// and safe to prune from persistence.
    pub fn max_window(&self) -> Duration {
        self.ceilings
            .values()
            .map(|c| c.window)
            .max()
            .unwrap_or(Duration::from_secs(3600))
    }

    fn ceiling_for(&self, class: OpClass) -> RateCeiling {
        self.ceilings.get(&class).copied().unwrap_or(RateCeiling {
            limit: usize::MAX,
            window: Duration::from_secs(3600),
        })
    }

    fn lock_windows(&self) -> std::sync::MutexGuard<'_, HashMap<OpClass, VecDeque<DateTime<Utc>>>> {
        match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Drop events that have left the window.
fn prune(window: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, length: Duration) {
    let cutoff = now - to_chrono(length);
    while let Some(front) = window.front() {
        if *front <= cutoff {
            window.pop_front();
        } else {
            break;
        }
    }
}
