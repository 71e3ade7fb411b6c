//! outpost: Resource-aware orchestrator for browser-automated posting.
//!
//! This library queues posting decisions, delivers them through a bounded
//! pool of browser sessions, and reconciles outcomes against the platform.

// Core modules
pub mod admin;
pub mod breaker;
pub mod browser;
pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod generator;
pub mod limiter;
pub mod metrics;
pub mod pipeline;
pub mod platform;
pub mod scheduler;
pub mod store;
pub mod utils;

// Re-export the configuration root and commonly used error types
pub use config::OutpostConfig;
pub use error::{BridgeError, GeneratorError, PlatformError};
