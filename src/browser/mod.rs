//! Browser session management.
//!
//! This module provides the bounded pool of browser sessions that every
//! platform operation runs through, plus the HTTP client for the bridge
//! process that actually owns the browsers.
//!
//! # Components
//!
//! - [`BridgeClient`]: REST client for the session bridge
//! - [`BrowserPool`]: fixed-capacity slot pool with priority queueing
//! - [`SlotHandle`]: RAII lease over a single session

pub mod pool;
pub mod session;

pub use pool::{BrowserPool, PoolConfig, PoolError, PoolHealthReport, PoolOccupancy, SlotHandle};
pub use session::{BridgeClient, BrowserSession, SessionBackend};
