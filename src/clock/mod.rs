//! Presentation clock and timer abstraction
//!
//! The presenter reads time from an optional [`PresentationClock`] and
//! schedules its own wake-ups through a [`TimerService`]. [`ClockWrapper`]
//! ties the two together with a continuity key so that timers armed
//! against an old clock, or before a stop, can never wake the presenter
//! later.

mod system;
mod timer;
mod wrapper;

pub use system::SystemClock;
pub use timer::ThreadTimer;
pub use wrapper::{ClockWrapper, WakeCallback};

use std::time::Duration;

use crate::utils::error::Result;

/// No time available (clockless operation)
pub const TIME_INVALID: i64 = i64::MIN;

/// Passed to [`ClockWrapper::set_timer`] to cancel the pending wake-up
pub const TIMER_CANCEL: i64 = i64::MAX;

/// A clock reading tagged with the continuity key it was taken under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockTime {
    /// Presentation time in 100 ns ticks, or [`TIME_INVALID`]
    pub time: i64,

    /// Continuity key current when the time was read
    pub continuity_key: u32,
}

impl ClockTime {
    /// Reading for clockless operation
    pub fn clockless(continuity_key: u32) -> Self {
        Self {
            time: TIME_INVALID,
            continuity_key,
        }
    }

    /// Whether a real time is available
    pub fn is_valid(&self) -> bool {
        self.time != TIME_INVALID
    }

    /// Time to schedule against; clockless readings compare after every
    /// sample
    pub fn schedule_time(&self) -> i64 {
        if self.is_valid() {
            self.time
        } else {
            i64::MAX
        }
    }
}

/// Source of presentation time
pub trait PresentationClock: Send + Sync {
    /// Current presentation time in 100 ns ticks
    fn time(&self) -> i64;

    /// Playback rate
    fn rate(&self) -> f32 {
        1.0
    }

    /// Whether time is advancing
    fn is_running(&self) -> bool;
}

/// Callback run when a timer expires
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub u64);

/// One-shot wall-clock timers
pub trait TimerService: Send + Sync {
    /// Run `callback` once after `delay`
    fn schedule(&self, delay: Duration, callback: TimerCallback) -> Result<TimerHandle>;

    /// Cancel a timer
    ///
    /// # Returns
    ///
    /// Returns true if the timer had not fired yet
    fn cancel(&self, handle: TimerHandle) -> bool;
}
