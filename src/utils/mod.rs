//! Shared utility functions for outpost.

pub mod time;
