//! Periodic job runner with dependency and pressure awareness.
//!
//! Each registered job gets its own loop: a random startup stagger, then
//! a fixed interval ticker raced against the shutdown broadcast. Job
//! bodies run in their own task so a panic is contained to the tick that
//! raised it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::RngExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::browser::BrowserPool;
use crate::metrics::MetricsCollector;
use crate::store::{JobHeartbeat, Store};
use crate::OutpostConfig;

use super::board::HealthBoard;
use super::job::JobSpec;

/// Errors raised while assembling or starting the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A job with this name is already registered.
    #[error("Job '{0}' is already registered")]
    DuplicateJob(String),

    /// A dependency names a job that is not registered.
    #[error("Job '{job}' depends on unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    /// Live mode requires at least one critical job; refusing to run a
    /// scheduler that cannot deliver anything.
    #[error("Live mode requires a critical delivery job")]
    CriticalJobMissing,
}

/// Source of resource-pressure readings for skip decisions.
pub trait ResourceGauge: Send + Sync {
    /// Fraction of capacity currently busy, 0.0 to 1.0.
    fn busy_fraction(&self) -> f64;
}

impl ResourceGauge for BrowserPool {
    fn busy_fraction(&self) -> f64 {
        self.occupancy().busy_fraction()
    }
}

/// Registers jobs and runs each on an independent timer.
pub struct Scheduler {
    config: OutpostConfig,
    store: Arc<dyn Store>,
    gauge: Arc<dyn ResourceGauge>,
    board: Arc<HealthBoard>,
    jobs: Vec<JobSpec>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new(config: OutpostConfig, store: Arc<dyn Store>, gauge: Arc<dyn ResourceGauge>) -> Self {
        let board = Arc::new(HealthBoard::new(config.dependency_staleness_factor));
        Self {
            config,
            store,
            gauge,
            board,
            jobs: Vec::new(),
        }
    }

    /// The shared health board.
    pub fn board(&self) -> &Arc<HealthBoard> {
        &self.board
    }

    /// Registers a job.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::DuplicateJob` if the name is taken.
    pub fn register(&mut self, spec: JobSpec) -> Result<(), SchedulerError> {
        if self.jobs.iter().any(|j| j.name == spec.name) {
            return Err(SchedulerError::DuplicateJob(spec.name.to_string()));
        }
        debug!(
            job = spec.name,
            interval = ?spec.interval,
            priority = spec.priority.as_str(),
            critical = spec.critical,
            "Job registered"
        );
        self.jobs.push(spec);
        Ok(())
    }

    /// Validates the job graph and spawns one loop per job.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::UnknownDependency` when a dependency names
    /// an unregistered job; the graph is static and checked up front.
    /// Returns `SchedulerError::CriticalJobMissing` in live mode with no
    /// critical job registered.
    pub fn start(self) -> Result<SchedulerHandle, SchedulerError> {
        for job in &self.jobs {
            for dependency in &job.depends_on {
                if !self.jobs.iter().any(|j| j.name == *dependency) {
                    return Err(SchedulerError::UnknownDependency {
                        job: job.name.to_string(),
                        dependency: dependency.to_string(),
                    });
                }
            }
        }
        if self.config.live && !self.jobs.iter().any(|j| j.critical) {
            return Err(SchedulerError::CriticalJobMissing);
        }

        for job in &self.jobs {
            self.board.register(job.name, job.interval);
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handles = Vec::with_capacity(self.jobs.len());

        for spec in self.jobs {
            let job_loop = JobLoop {
                spec,
                config: self.config.clone(),
                store: Arc::clone(&self.store),
                gauge: Arc::clone(&self.gauge),
                board: Arc::clone(&self.board),
                shutdown: shutdown_tx.subscribe(),
                metrics: MetricsCollector::new(),
                last_success_at: None,
            };
            handles.push(tokio::spawn(job_loop.run()));
        }

        info!(jobs = handles.len(), "Scheduler started");
        Ok(SchedulerHandle {
            shutdown_tx,
            handles,
        })
    }
}

/// Running scheduler; owns the job loops.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Number of running job loops.
    pub fn job_count(&self) -> usize {
        self.handles.len()
    }

    /// Signals every loop and waits up to `timeout` for them to stop.
    ///
    /// Loops still inside a job body at the deadline are abandoned; the
    /// bodies keep running detached until the runtime drops.
    pub async fn shutdown(mut self, timeout: Duration) {
        info!("Initiating scheduler shutdown");
        let _ = self.shutdown_tx.send(());

        let drain = async {
            for handle in self.handles.drain(..) {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!(error = %e, "Job loop panicked during shutdown");
                    }
                }
            }
        };

        match tokio::time::timeout(timeout, drain).await {
            Ok(()) => info!("Scheduler shutdown complete"),
            Err(_) => warn!(?timeout, "Scheduler shutdown timed out; abandoning remaining loops"),
        }
    }
}

/// One job's timer loop.
struct JobLoop {
    spec: JobSpec,
    config: OutpostConfig,
    store: Arc<dyn Store>,
    gauge: Arc<dyn ResourceGauge>,
    board: Arc<HealthBoard>,
    shutdown: broadcast::Receiver<()>,
    metrics: MetricsCollector,
    last_success_at: Option<chrono::DateTime<Utc>>,
}

impl JobLoop {
    async fn run(mut self) {
        // Random stagger spreads start times so job intervals never align
        // into synchronized bursts against the pool.
        let cap = self.spec.interval.min(self.config.max_stagger);
        if !cap.is_zero() {
            let stagger = rand::rng().random_range(Duration::ZERO..cap);
            debug!(job = self.spec.name, stagger = ?stagger, "Staggering job start");
            tokio::select! {
                _ = tokio::time::sleep(stagger) => {}
                _ = self.shutdown.recv() => return,
            }
        }

        let mut ticker = tokio::time::interval(self.spec.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(job = self.spec.name, interval = ?self.spec.interval, "Job loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.recv() => break,
            }

            if self.should_skip() {
                continue;
            }

            self.run_once().await;
        }

        info!(job = self.spec.name, "Job loop stopped");
    }

    /// Gate checks that can waive a tick without running the body.
    fn should_skip(&self) -> bool {
        for dependency in &self.spec.depends_on {
            if !self.board.is_healthy(dependency) {
                warn!(
                    job = self.spec.name,
                    dependency,
                    "Dependency has no recent success; skipping tick"
                );
                self.metrics.record_job_run(self.spec.name, "skipped", 0.0);
                return true;
            }
        }

        if !self.spec.critical && !self.spec.priority.runs_under_pressure() {
            let busy = self.gauge.busy_fraction();
            if busy >= self.config.pressure_threshold {
                info!(
                    job = self.spec.name,
                    busy_fraction = busy,
                    "Browser pool under pressure; skipping tick"
                );
                self.metrics.record_job_run(self.spec.name, "skipped", 0.0);
                return true;
            }
        }

        false
    }

    /// Runs one tick body with panic isolation.
    async fn run_once(&mut self) {
        let started = Instant::now();
        self.board.record_run(self.spec.name);

        let outcome = tokio::spawn(self.spec.invoke()).await;
        let elapsed = started.elapsed().as_secs_f64();

        let error: Option<String> = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(join) if join.is_panic() => Some("job body panicked".to_string()),
            Err(join) => Some(join.to_string()),
        };

        match &error {
            None => {
                debug!(
                    job = self.spec.name,
                    elapsed_secs = format!("{elapsed:.1}"),
                    "Job tick finished"
                );
                self.board.record_success(self.spec.name);
                self.last_success_at = Some(Utc::now());
                self.metrics.record_job_run(self.spec.name, "ok", elapsed);
            }
            Some(message) => {
                error!(job = self.spec.name, error = %message, "Job tick failed");
                self.board.record_failure(self.spec.name);
                self.metrics.record_job_run(self.spec.name, "error", elapsed);
            }
        }

        self.persist_heartbeat(error).await;
    }

    /// Best-effort heartbeat upsert; a store hiccup never fails the job.
    async fn persist_heartbeat(&self, error: Option<String>) {
        let mut heartbeat = JobHeartbeat::new(self.spec.name);
        heartbeat.last_run = Some(Utc::now());
        heartbeat.last_success = self.last_success_at;
        heartbeat.last_error = error;
        heartbeat.consecutive_failures = self.board.consecutive_failures(self.spec.name) as i32;

        if let Err(e) = self.store.save_heartbeat(&heartbeat).await {
            warn!(job = self.spec.name, error = %e, "Failed to persist heartbeat");
        }
    }
}
