//! Command-line interface for outpost.
//!
//! Provides commands for running the daemon, applying migrations,
//! enqueueing decisions, one-shot delivery and status reporting.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
