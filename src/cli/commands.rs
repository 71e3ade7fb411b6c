//! CLI command definitions for outpost.
//!
//! This module provides the command-line surface of the orchestrator:
//! the long-running daemon, schema migrations, manual decision intake,
//! a one-shot delivery tick and status reporting.

use std::fs;
use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{debug, info, warn};

use crate::admin::StatusReport;
use crate::breaker::{CircuitBreaker, DELIVERY_BREAKER};
use crate::browser::{BridgeClient, BrowserPool, PoolConfig};
use crate::config::OutpostConfig;
use crate::generator::{run_generation, validate_payload, HttpContentSource};
use crate::limiter::{OpClass, RateLimiter};
use crate::metrics::{export_metrics, init_metrics, MetricsCollector};
use crate::pipeline::{MetricsScraper, PostingPipeline, Reconciler};
use crate::platform::{PlatformClient, RemotePlatform};
use crate::scheduler::{
    JobPriority, JobSpec, Scheduler, GENERATION_JOB, MAINTENANCE_JOB, POOL_HEALTH_JOB,
    POSTING_JOB, RECONCILE_JOB, SCRAPE_JOB,
};
use crate::store::{
    DecisionStatus, MigrationRunner, NewDecision, Payload, PgStore, Store,
};
use crate::utils::time::ago;

/// Resource-aware posting orchestrator for browser-automated delivery.
#[derive(Parser)]
#[command(name = "outpost")]
#[command(about = "Queue, deliver and reconcile social posts through a browser session pool")]
#[command(version)]
#[command(
    long_about = "outpost drains a persisted queue of posting decisions through a bounded pool \
of browser sessions, with circuit breaking, sliding rate windows and post-hoc verification.\n\n\
Configuration comes from the environment (DATABASE_URL plus OUTPOST_* variables).\n\n\
Example usage:\n  outpost migrate\n  outpost enqueue --text \"hello world\"\n  outpost run"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(
        short,
        long,
        env = "OUTPOST_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the orchestrator daemon until interrupted.
    Run,

    /// Apply pending database migrations.
    Migrate,

    /// Insert a posting decision into the queue.
    #[command(alias = "enq")]
    Enqueue(EnqueueArgs),

    /// Run a single posting tick and exit (live smoke test).
    #[command(name = "post-once")]
    PostOnce,

    /// Print queue, job, breaker and rate-window status.
    Status(StatusArgs),
}

/// Arguments for the enqueue command.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Text of a single post, or of a reply with --reply-to.
    #[arg(long, conflicts_with = "parts_file")]
    pub text: Option<String>,

    /// File containing thread parts separated by blank lines.
    #[arg(long)]
    pub parts_file: Option<String>,

    /// Platform post id the text replies to.
    #[arg(long, requires = "text")]
    pub reply_to: Option<String>,

    /// Delay delivery by this many seconds.
    #[arg(long, default_value = "0")]
    pub delay_secs: u64,

    /// Print the stored decision as JSON.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for the status command.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Print Prometheus text instead of JSON.
    #[arg(long)]
    pub metrics: bool,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
///
/// This is the main entry point for the outpost CLI.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run => run_daemon().await,
        Commands::Migrate => run_migrate().await,
        Commands::Enqueue(args) => run_enqueue(args).await,
        Commands::PostOnce => run_post_once().await,
        Commands::Status(args) => run_status(args).await,
    }
}

/// Loads configuration from the environment and connects the store.
async fn connect() -> anyhow::Result<(OutpostConfig, Arc<PgStore>)> {
    let config = OutpostConfig::from_env()?;
    let store = PgStore::connect(&config.database_url).await?;
    Ok((config, Arc::new(store)))
}

/// Shared components wired from configuration and persisted state.
struct Services {
    config: OutpostConfig,
    store: Arc<dyn Store>,
    pool: Arc<BrowserPool>,
    platform: Arc<dyn PlatformClient>,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<RateLimiter>,
}

/// Builds the pool, platform client, breaker and limiter.
///
/// Breaker state and rate windows are hydrated from the store, so a
/// restart neither forgets an open breaker nor resets the hourly windows.
async fn wire_services(config: OutpostConfig, store: Arc<PgStore>) -> anyhow::Result<Services> {
    let store: Arc<dyn Store> = store;

    let bridge = Arc::new(BridgeClient::from_config(&config)?);
    let pool = Arc::new(BrowserPool::new(PoolConfig::from_config(&config), bridge.clone()));
    let platform: Arc<dyn PlatformClient> = Arc::new(RemotePlatform::new(bridge));

    let breaker = CircuitBreaker::from_config(&config);
    if let Some(record) = store.load_breaker(DELIVERY_BREAKER).await? {
        info!(
            state = %record.state,
            failure_streak = record.failure_streak,
            "Hydrating delivery breaker from store"
        );
        breaker.hydrate(&record);
    }

    let limiter = RateLimiter::from_config(&config);
    let since = ago(limiter.max_window());
    for class in OpClass::all() {
        let events = store.load_rate_events(*class, since).await?;
        if !events.is_empty() {
            debug!(class = %class, events = events.len(), "Hydrating rate window from store");
        }
        limiter.hydrate(*class, events);
    }

    Ok(Services {
        config,
        store,
        pool,
        platform,
        breaker: Arc::new(breaker),
        limiter: Arc::new(limiter),
    })
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_daemon() -> anyhow::Result<()> {
    let (config, store) = connect().await?;
    init_metrics()?;

    info!(
        live = config.live,
        pool_capacity = config.pool_capacity,
        "Starting outpost"
    );

    store.run_migrations().await?;

    let services = wire_services(config, store).await?;

    let pipeline = Arc::new(PostingPipeline::new(
        services.store.clone(),
        services.pool.clone(),
        services.platform.clone(),
        services.breaker.clone(),
        services.limiter.clone(),
        services.config.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        services.store.clone(),
        services.pool.clone(),
        services.platform.clone(),
        services.limiter.clone(),
        services.config.clone(),
    ));
    let scraper = Arc::new(MetricsScraper::new(
        services.store.clone(),
        services.pool.clone(),
        services.platform.clone(),
        services.limiter.clone(),
        services.config.clone(),
    ));

    let mut scheduler = Scheduler::new(
        services.config.clone(),
        services.store.clone(),
        services.pool.clone(),
    );
    register_jobs(&mut scheduler, &services, pipeline, reconciler, scraper)?;

    let handle = scheduler.start()?;
    info!(jobs = handle.job_count(), "outpost running; ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.shutdown(services.config.shutdown_timeout).await;
    services.pool.shutdown().await;
    info!("Shutdown complete");

    Ok(())
}

/// Registers every scheduled job on the daemon scheduler.
fn register_jobs(
    scheduler: &mut Scheduler,
    services: &Services,
    pipeline: Arc<PostingPipeline>,
    reconciler: Arc<Reconciler>,
    scraper: Arc<MetricsScraper>,
) -> anyhow::Result<()> {
    scheduler.register(
        JobSpec::new(POSTING_JOB, services.config.posting_interval, move || {
            let pipeline = Arc::clone(&pipeline);
            async move {
                let report = pipeline.tick().await?;
                if report.examined > 0 {
                    info!(
                        examined = report.examined,
                        posted = report.posted,
                        requeued = report.requeued,
                        failed = report.failed,
                        "Posting tick settled"
                    );
                }
                Ok(())
            }
        })
        .mark_critical(),
    )?;

    scheduler.register(
        JobSpec::new(RECONCILE_JOB, services.config.reconcile_interval, move || {
            let reconciler = Arc::clone(&reconciler);
            async move {
                let report = reconciler.run().await?;
                if report.reconciled > 0 {
                    info!(
                        reconciled = report.reconciled,
                        "Corrected failed decisions found live on the platform"
                    );
                }
                Ok(())
            }
        })
        .with_dependency(POSTING_JOB),
    )?;

    if services.config.generator_url.is_some() {
        let source = Arc::new(HttpContentSource::from_config(&services.config)?);
        let store = services.store.clone();
        let config = services.config.clone();
        scheduler.register(
            JobSpec::new(GENERATION_JOB, config.generation_interval, move || {
                let source = Arc::clone(&source);
                let store = Arc::clone(&store);
                let config = config.clone();
                async move {
                    let counts = store.status_counts().await?;
                    if counts.queued >= config.min_queue_depth {
                        debug!(queued = counts.queued, "Queue deep enough; not generating");
                        return Ok(());
                    }
                    let report = run_generation(source.as_ref(), store.as_ref(), &config).await?;
                    if let Some(id) = report.enqueued {
                        info!(decision_id = %id, "Generated decision enqueued");
                    }
                    Ok(())
                }
            })
            .with_priority(JobPriority::Low),
        )?;
    }

    scheduler.register(
        JobSpec::new(SCRAPE_JOB, services.config.scrape_interval, move || {
            let scraper = Arc::clone(&scraper);
            async move {
                let report = scraper.run().await?;
                if report.collected > 0 {
                    debug!(collected = report.collected, "Engagement snapshots collected");
                }
                Ok(())
            }
        })
        .with_dependency(POSTING_JOB)
        .with_priority(JobPriority::Low),
    )?;

    let health_pool = services.pool.clone();
    scheduler.register(
        JobSpec::new(POOL_HEALTH_JOB, services.config.health_interval, move || {
            let pool = Arc::clone(&health_pool);
            async move {
                let report = pool.health_check().await;
                let metrics = MetricsCollector::new();
                for _ in 0..report.recycled_overdue {
                    metrics.record_pool_recycle("overdue");
                }
                for _ in 0..report.closed_unhealthy {
                    metrics.record_pool_recycle("unhealthy");
                }
                if report.pool_restarted {
                    metrics.record_pool_recycle("restarted");
                }
                if report.recycled_overdue > 0 || report.closed_unhealthy > 0 {
                    warn!(
                        recycled_overdue = report.recycled_overdue,
                        closed_unhealthy = report.closed_unhealthy,
                        pool_restarted = report.pool_restarted,
                        "Pool health check recycled sessions"
                    );
                }

                let occupancy = pool.occupancy();
                metrics.update_pool(
                    occupancy.busy,
                    occupancy.idle,
                    occupancy.vacant,
                    occupancy.waiting,
                );
                Ok(())
            }
        })
        .with_priority(JobPriority::High),
    )?;

    let maint_store = services.store.clone();
    let maint_limiter = services.limiter.clone();
    let maint_config = services.config.clone();
    scheduler.register(
        JobSpec::new(
            MAINTENANCE_JOB,
            services.config.maintenance_interval,
            move || {
                let store = Arc::clone(&maint_store);
                let limiter = Arc::clone(&maint_limiter);
                let config = maint_config.clone();
                async move {
                    // A delivery may hold `delivering` for the full thread
                    // deadline; anything far older lost its worker.
                    let stuck_after = config.delivery_deadline(config.max_thread_parts) * 2;
                    let recovered = store.recover_stuck(stuck_after).await?;
                    if recovered > 0 {
                        warn!(recovered, "Returned stuck decisions to the queue");
                    }

                    let cutoff = ago(limiter.max_window());
                    let pruned = store.prune_rate_events(cutoff).await?;
                    if pruned > 0 {
                        debug!(pruned, "Pruned rate events outside every window");
                    }

                    let counts = store.status_counts().await?;
                    let metrics = MetricsCollector::new();
                    for status in DecisionStatus::all() {
                        metrics.update_queue_depth(status.as_str(), counts.count_for(*status));
                    }
                    Ok(())
                }
            },
        )
        .with_priority(JobPriority::High),
    )?;

    Ok(())
}

// ============================================================================
// Migrate Command Implementation
// ============================================================================

async fn run_migrate() -> anyhow::Result<()> {
    let (_config, store) = connect().await?;

    let runner = MigrationRunner::new(store.pool().clone());
    runner.run_migrations().await?;

    let applied = runner.list_applied_migrations().await?;
    println!("✓ Schema up to date ({} migrations applied)", applied.len());
    for migration in &applied {
        println!("  {} at {}", migration.name, migration.applied_at);
    }

    Ok(())
}

// ============================================================================
// Enqueue Command Implementation
// ============================================================================

async fn run_enqueue(args: EnqueueArgs) -> anyhow::Result<()> {
    let (config, store) = connect().await?;

    let payload = build_payload(&args)?;
    validate_payload(&payload, config.max_part_chars, config.max_thread_parts)?;

    let scheduled_at = Utc::now() + chrono::Duration::seconds(args.delay_secs as i64);
    let decision = store
        .enqueue(
            NewDecision::new(payload)
                .with_scheduled_at(scheduled_at)
                .with_max_attempts(config.max_attempts as i32),
        )
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&decision)?);
        return Ok(());
    }

    println!("✓ Enqueued decision {}", decision.id);
    println!(
        "  Kind: {} ({} part(s))",
        decision.kind,
        decision.payload.part_count()
    );
    println!("  Scheduled: {}", decision.scheduled_at);
    println!("  Fingerprint: {}", decision.fingerprint);

    Ok(())
}

/// Builds the payload from the enqueue arguments.
fn build_payload(args: &EnqueueArgs) -> anyhow::Result<Payload> {
    if let Some(path) = &args.parts_file {
        let content = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read parts file {}: {}", path, e))?;
        let mut parts = split_parts(&content);
        return match parts.len() {
            0 => Err(anyhow::anyhow!("Parts file {} contains no content", path)),
            1 => Ok(Payload::Single {
                text: parts.remove(0),
            }),
            _ => Ok(Payload::Thread { parts }),
        };
    }

    let text = args
        .text
        .clone()
        .ok_or_else(|| anyhow::anyhow!("Provide --text or --parts-file"))?;

    Ok(match args.reply_to.clone() {
        Some(target) => Payload::Reply { target, text },
        None => Payload::Single { text },
    })
}

/// Splits file content into thread parts on blank lines.
fn split_parts(content: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.trim().is_empty() {
                parts.push(current.trim_end().to_string());
            }
            current.clear();
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim_end().to_string());
    }

    parts
}

// ============================================================================
// Post-Once Command Implementation
// ============================================================================

async fn run_post_once() -> anyhow::Result<()> {
    let (config, store) = connect().await?;
    init_metrics()?;

    store.run_migrations().await?;
    let services = wire_services(config, store).await?;

    let pipeline = PostingPipeline::new(
        services.store.clone(),
        services.pool.clone(),
        services.platform.clone(),
        services.breaker.clone(),
        services.limiter.clone(),
        services.config.clone(),
    );

    let report = pipeline.tick().await?;
    services.pool.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

// ============================================================================
// Status Command Implementation
// ============================================================================

async fn run_status(args: StatusArgs) -> anyhow::Result<()> {
    let (config, store) = connect().await?;
    let report = StatusReport::gather(store.as_ref(), &config).await?;

    if args.metrics {
        init_metrics()?;
        report.publish_gauges(&MetricsCollector::new());
        print!("{}", export_metrics());
        return Ok(());
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
