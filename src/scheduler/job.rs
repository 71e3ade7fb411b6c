//! Job definitions for the scheduler.
//!
//! This module defines the core types of the scheduling system:
//!
//! - `JobSpec`: A periodic job and its scheduling contract
//! - `JobPriority`: How the job ranks when browser slots are scarce
//! - `JobError`: Failure reported by a job body

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Name of the posting job. Mandatory in live mode.
pub const POSTING_JOB: &str = "posting";
/// Name of the reconciliation job.
pub const RECONCILE_JOB: &str = "reconcile";
/// Name of the content generation job.
pub const GENERATION_JOB: &str = "generation";
/// Name of the engagement scrape job.
pub const SCRAPE_JOB: &str = "metrics_scrape";
/// Name of the pool health check job.
pub const POOL_HEALTH_JOB: &str = "pool_health";
/// Name of the maintenance job.
pub const MAINTENANCE_JOB: &str = "maintenance";

/// Failure reported by a job body.
///
/// Job bodies collapse their subsystem errors into a message; the
/// scheduler records the outcome but never inspects the cause.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct JobError(String);

impl JobError {
    /// Creates a job error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<crate::pipeline::PipelineError> for JobError {
    fn from(e: crate::pipeline::PipelineError) -> Self {
        Self(e.to_string())
    }
}

impl From<crate::store::StoreError> for JobError {
    fn from(e: crate::store::StoreError) -> Self {
        Self(e.to_string())
    }
}

impl From<crate::generator::GenerationError> for JobError {
    fn from(e: crate::generator::GenerationError) -> Self {
        Self(e.to_string())
    }
}

/// How a job ranks when browser slots are scarce.
///
/// `Critical` and `High` jobs run even under resource pressure; `Normal`
/// and `Low` jobs skip their tick until the pool has headroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    Critical,
    High,
    Normal,
    Low,
}

impl JobPriority {
    /// Whether a job of this priority runs when the pool is saturated.
    pub fn runs_under_pressure(&self) -> bool {
        matches!(self, JobPriority::Critical | JobPriority::High)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobPriority::Critical => "critical",
            JobPriority::High => "high",
            JobPriority::Normal => "normal",
            JobPriority::Low => "low",
        }
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Future returned by a job body.
pub type JobFuture = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send>>;

/// Factory invoked once per tick to produce the job body.
pub type JobFn = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// A periodic job and its scheduling contract.
///
/// Each registered job runs on its own timer, independent of every other
/// job. Dependencies do not order execution; they only gate a tick on the
/// named jobs having succeeded recently.
#[derive(Clone)]
pub struct JobSpec {
    /// Unique job name; also the heartbeat row key.
    pub name: &'static str,
    /// Interval between tick starts.
    pub interval: Duration,
    /// Rank under resource pressure.
    pub priority: JobPriority,
    /// Jobs whose recent success this job requires.
    pub depends_on: Vec<&'static str>,
    /// Critical jobs are mandatory in live mode and never pressure-skipped.
    pub critical: bool,
    run: JobFn,
}

impl JobSpec {
    /// Creates a normal-priority job with no dependencies.
    ///
    /// `run` is called once per tick and must produce a fresh future each
    /// time.
    pub fn new<F, Fut>(name: &'static str, interval: Duration, run: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        Self {
            name,
            interval,
            priority: JobPriority::Normal,
            depends_on: Vec::new(),
            critical: false,
            run: Arc::new(move || Box::pin(run())),
        }
    }

    /// Sets the pressure priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Declares a dependency on another job's recent success.
    pub fn with_dependency(mut self, name: &'static str) -> Self {
        self.depends_on.push(name);
        self
    }

    /// Marks the job mandatory in live mode. Critical jobs also run at
    /// `Critical` priority.
    pub fn mark_critical(mut self) -> Self {
        self.critical = true;
        self.priority = JobPriority::Critical;
        self
    }

    /// Produces one tick's body.
    pub(crate) fn invoke(&self) -> JobFuture {
        (self.run)()
    }
}

impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("priority", &self.priority)
            .field("depends_on", &self.depends_on)
            .field("critical", &self.critical)
            .finish_non_exhaustive()
    }
}
