//! Utility module for the presenter
//!
//! This module provides common utilities used throughout the crate:
//! - Error handling with custom error types
//! - Configuration management
//! - Sample time helpers

pub mod config;
pub mod error;

// Re-export commonly used items
pub use config::{Config, PresenterConfig, ClockConfig, GeneralConfig};
pub use error::{PresenterError, ErrorKind, Result};

use std::time::Duration;

/// Number of sample-time ticks (100 ns units) per second
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert sample-time ticks to a duration; negative values clamp to zero
pub fn ticks_to_duration(ticks: i64) -> Duration {
    if ticks <= 0 {
        Duration::ZERO
    } else {
        Duration::from_nanos((ticks as u64).saturating_mul(100))
    }
}

/// Convert a duration to sample-time ticks, saturating at `i64::MAX`
pub fn duration_to_ticks(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos() / 100).unwrap_or(i64::MAX)
}

/// Format sample-time ticks for logging
///
/// Produces "MM:SS.mmm", or "HH:MM:SS.mmm" for times beyond an hour
pub fn format_ticks(ticks: i64) -> String {
    if ticks < 0 {
        return "--:--.---".to_string();
    }

    let total_ms = ticks / 10_000;
    let millis = total_ms % 1000;
    let total_secs = total_ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
    } else {
        format!("{:02}:{:02}.{:03}", minutes, seconds, millis)
    }
}
