//! Job scheduling for periodic outpost work.
//!
//! Every recurring task in the system runs under this scheduler: the
//! posting tick, reconciliation, content generation, metrics scraping,
//! pool health checks, and maintenance. Each job gets an independent
//! timer loop, so a slow scrape never delays a delivery tick.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Scheduler                          │
//! │  register(JobSpec) ──► validate graph ──► start()        │
//! └──────────────────────────┬───────────────────────────────┘
//!                            │ one task per job
//!          ┌─────────────────┼─────────────────┐
//!          ▼                 ▼                 ▼
//!     ┌─────────┐       ┌─────────┐       ┌─────────┐
//!     │ JobLoop │       │ JobLoop │       │ JobLoop │
//!     │ posting │       │reconcile│       │ scrape  │
//!     └────┬────┘       └────┬────┘       └────┬────┘
//!          │ record runs     │ skip when       │ skip under
//!          ▼                 ▼ upstream stale  ▼ pool pressure
//!     ┌──────────────────────────────────────────────┐
//!     │          HealthBoard (in-memory)             │
//!     └──────────────────────────────────────────────┘
//! ```
//!
//! # Reliability Features
//!
//! - **Stagger**: each loop sleeps a random span before its first tick so
//!   intervals never line up into synchronized bursts.
//! - **Panic isolation**: job bodies run in their own task; a panic marks
//!   the tick failed and the loop keeps going.
//! - **Dependency skips**: a job whose upstream has no recent success
//!   skips the tick instead of working from stale state.
//! - **Pressure skips**: low-priority jobs stand down while the browser
//!   pool is mostly busy, leaving slots for deliveries.
//! - **Heartbeats**: every tick outcome is upserted to the store so
//!   `outpost status` can show liveness across restarts.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use outpost::scheduler::{JobSpec, Scheduler};
//!
//! let mut scheduler = Scheduler::new(config, store, pool);
//! scheduler.register(
//!     JobSpec::new("posting", Duration::from_secs(180), move || {
//!         let pipeline = pipeline.clone();
//!         async move { pipeline.tick().await.map(|_| ()).map_err(Into::into) }
//!     })
//!     .mark_critical(),
//! )?;
//! let handle = scheduler.start()?;
//! // ... later
//! handle.shutdown(Duration::from_secs(30)).await;
//! ```

pub mod board;
pub mod job;
pub mod runner;

pub use board::HealthBoard;
pub use job::{
    JobError, JobPriority, JobSpec, GENERATION_JOB, MAINTENANCE_JOB, POOL_HEALTH_JOB, POSTING_JOB,
    RECONCILE_JOB, SCRAPE_JOB,
};
pub use runner::{ResourceGauge, Scheduler, SchedulerError, SchedulerHandle};
