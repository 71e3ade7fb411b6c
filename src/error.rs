//! Error types for outpost operations.
//!
//! Subsystem-local errors (pool, store, scheduler, config) live next to
//! their modules. The enums here cross module boundaries:
//! - Browser bridge transport
//! - Platform action outcomes
//! - Content generation

use std::time::Duration;
use thiserror::Error;

/// Errors from the browser automation bridge transport.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Bridge request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Bridge returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Bridge response malformed: {0}")]
    Protocol(String),

    #[error("Session '{0}' not found on bridge")]
    SessionNotFound(String),
}

/// Outcomes of platform actions executed through a browser session.
///
/// `Rejected` is a confirmed failure: the platform refused the action and
/// nothing was published. `Timeout` is ambiguous: the deadline passed but
/// the post may still have landed, so callers must verify before recording
/// a failure.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("Delivery rejected by platform: {reason}")]
    Rejected { reason: String },

    #[error("Delivery timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl PlatformError {
    /// Whether this outcome is ambiguous and requires verification before
    /// it may be recorded as a failure.
    pub fn needs_verification(&self) -> bool {
        matches!(self, PlatformError::Timeout { .. })
    }
}

/// Errors from the content generation service.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generator request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Generator returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Generated payload rejected: {0}")]
    InvalidPayload(String),

    #[error("No content source configured")]
    NotConfigured,
}
