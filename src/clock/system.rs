//! Wall-clock presentation clock

use parking_lot::Mutex;
use std::time::Instant;

use crate::clock::PresentationClock;
use crate::utils::{duration_to_ticks, error::PresenterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Stopped,
    Running,
    Paused,
}

#[derive(Debug)]
struct ClockInner {
    state: RunState,

    /// Presentation time at `anchor`
    base: i64,

    /// Wall time `base` was taken at, while running
    anchor: Option<Instant>,

    rate: f32,
}

impl ClockInner {
    fn now(&self) -> i64 {
        match (self.state, self.anchor) {
            (RunState::Running, Some(anchor)) => {
                let elapsed = duration_to_ticks(anchor.elapsed()) as f64 * self.rate as f64;
                self.base.saturating_add(elapsed as i64)
            }
            _ => self.base,
        }
    }

    fn rebase(&mut self) {
        self.base = self.now();
        self.anchor = Some(Instant::now());
    }
}

/// Presentation clock driven by `Instant`
#[derive(Debug)]
pub struct SystemClock {
    inner: Mutex<ClockInner>,
}

impl SystemClock {
    /// Create a stopped clock at time zero
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockInner {
                state: RunState::Stopped,
                base: 0,
                anchor: None,
                rate: 1.0,
            }),
        }
    }

    /// Start running
    ///
    /// # Arguments
    ///
    /// * `offset` - Start position in ticks, or None to continue from the
    ///   current position
    pub fn start(&self, offset: Option<i64>) {
        let mut inner = self.inner.lock();
        let base = offset.unwrap_or_else(|| inner.now());
        inner.base = base;
        inner.anchor = Some(Instant::now());
        inner.state = RunState::Running;
    }

    /// Stop and rewind to zero
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.state = RunState::Stopped;
        inner.base = 0;
        inner.anchor = None;
    }

    /// Freeze at the current position
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        if inner.state == RunState::Running {
            inner.base = inner.now();
            inner.anchor = None;
            inner.state = RunState::Paused;
        }
    }

    /// Resume from pause
    pub fn restart(&self) {
        let mut inner = self.inner.lock();
        if inner.state == RunState::Paused {
            inner.anchor = Some(Instant::now());
            inner.state = RunState::Running;
        }
    }

    /// Change the playback rate, keeping the current position
    pub fn set_rate(&self, rate: f32) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PresenterError::UnsupportedRate(rate));
        }
        let mut inner = self.inner.lock();
        if inner.state == RunState::Running {
            inner.rebase();
        }
        inner.rate = rate;
        Ok(())
    }

    /// Jump to `time` without changing the run state
    pub fn seek(&self, time: i64) {
        let mut inner = self.inner.lock();
        inner.base = time;
        if inner.state == RunState::Running {
            inner.anchor = Some(Instant::now());
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationClock for SystemClock {
    fn time(&self) -> i64 {
        self.inner.lock().now()
    }

    fn rate(&self) -> f32 {
        self.inner.lock().rate
    }

    fn is_running(&self) -> bool {
        self.inner.lock().state == RunState::Running
    }
}
