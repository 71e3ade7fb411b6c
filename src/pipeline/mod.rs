//! Delivery pipeline for posting decisions.
//!
//! This module turns queued posting decisions into published posts,
//! and keeps the decision store honest afterwards.
//!
//! # Architecture
//!
//! The pipeline consists of several components:
//!
//! - **Posting**: The tick loop that claims ready decisions and delivers them
//! - **Chain**: Sequential part-by-part delivery for threads and replies
//! - **Reconcile**: Corrects `failed` decisions that actually went live
//! - **Scrape**: Collects engagement metrics for recently published posts
//!
//! # Delivery Flow
//!
//! Each tick walks ready decisions through a fixed gate order:
//!
//! 1. **Dedup**: A matching fingerprint already posted or in flight marks
//!    the decision `duplicate` before it costs anything
//! 2. **Claim**: A conditional status update takes exclusive ownership
//! 3. **Rate gate**: The delivery window must have room; otherwise the
//!    decision is released back to the queue with no attempt consumed
//! 4. **Breaker gate**: An open circuit releases the decision until the
//!    cooldown allows a probe
//! 5. **Slot**: A browser session is acquired from the pool
//! 6. **Delivery**: The payload is posted part by part with per-part and
//!    whole-delivery deadlines
//! 7. **Settlement**: Success, verified-timeout success, retry with
//!    backoff, or terminal failure; the breaker hears about each attempt
//!
//! # Example
//!
//! ```rust,ignore
//! use outpost::pipeline::PostingPipeline;
//!
//! let pipeline = PostingPipeline::new(store, pool, platform, breaker, limiter, config);
//!
//! let report = pipeline.tick().await?;
//! println!("posted {} of {} examined", report.posted, report.examined);
//! ```
//!
//! # Ambiguous Outcomes
//!
//! A delivery that times out may still have landed. When nothing was
//! confirmed posted, the pipeline runs a verification probe against the
//! platform before deciding between `posted` and a retry. Once a decision
//! reaches `posted` it is never reversed; a timed-out thread whose root
//! part went live settles as `posted` rather than risking a double post.

pub mod chain;
pub mod posting;
pub mod reconcile;
pub mod scrape;

// Re-export main types for convenience
pub use chain::{deliver_chain, ChainFailure};
pub use posting::{PipelineError, PostingPipeline, TickReport};
pub use reconcile::{ReconcileReport, Reconciler};
pub use scrape::{MetricsScraper, ScrapeReport};
