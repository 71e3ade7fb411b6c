//! In-memory job health, consulted for dependency-gated ticks.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct JobHealth {
    interval: Duration,
    registered_at: Instant,
    last_run: Option<Instant>,
    last_success: Option<Instant>,
    consecutive_failures: u32,
}

/// Tracks when each job last succeeded.
///
/// A job is healthy while its most recent success is within
/// `staleness_factor` times its own interval. A job that has not yet
/// succeeded gets the same allowance measured from registration, so
/// dependents are not starved during startup.
pub struct HealthBoard {
    staleness_factor: u32,
    jobs: Mutex<HashMap<&'static str, JobHealth>>,
}

impl HealthBoard {
    /// Creates an empty board.
    pub fn new(staleness_factor: u32) -> Self {
        Self {
            staleness_factor,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Adds a job to the board. The interval sets its staleness budget.
    pub fn register(&self, name: &'static str, interval: Duration) {
        self.lock().insert(
            name,
            JobHealth {
                interval,
                registered_at: Instant::now(),
                last_run: None,
                last_success: None,
                consecutive_failures: 0,
            },
        );
    }

    /// Records that a tick of `name` started.
    pub fn record_run(&self, name: &str) {
        if let Some(health) = self.lock().get_mut(name) {
            health.last_run = Some(Instant::now());
        }
    }

    /// Records a successful tick of `name`.
    pub fn record_success(&self, name: &str) {
        if let Some(health) = self.lock().get_mut(name) {
            health.last_success = Some(Instant::now());
            health.consecutive_failures = 0;
        }
    }

    /// Records a failed tick of `name`.
    pub fn record_failure(&self, name: &str) {
        if let Some(health) = self.lock().get_mut(name) {
            health.consecutive_failures += 1;
        }
    }

    /// Whether `name` has succeeded recently enough to be relied on.
    ///
    /// Unknown jobs are unhealthy.
    pub fn is_healthy(&self, name: &str) -> bool {
        let jobs = self.lock();
        let Some(health) = jobs.get(name) else {
            return false;
        };

        let allowance = health.interval.saturating_mul(self.staleness_factor);
        let anchor = health.last_success.unwrap_or(health.registered_at);
        anchor.elapsed() <= allowance
    }

    /// Consecutive failures currently recorded for `name`.
    pub fn consecutive_failures(&self, name: &str) -> u32 {
        self.lock()
            .get(name)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    /// Whether `name` has ever started a tick.
    pub fn has_run(&self, name: &str) -> bool {
        self.lock().get(name).is_some_and(|h| h.last_run.is_some())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<&'static str, JobHealth>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
