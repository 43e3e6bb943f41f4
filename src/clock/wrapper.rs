//! Presenter-facing clock wrapper
//!
//! Wraps an optional presentation clock and a timer service behind one
//! wake-up request API. Each clock change bumps a continuity key; requests
//! and timer callbacks carrying an older key are dropped.
//!
//! Re-arming is serialized without blocking: the first caller sets the
//! `arming` flag and applies requests, while concurrent callers park their
//! request (merged with any already parked) and return. The in-flight
//! setter drains the parked request before clearing the flag.

use log::{debug, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::clock::{ClockTime, PresentationClock, TimerHandle, TimerService, TIMER_CANCEL};
use crate::events::TaskQueue;
use crate::utils::{duration_to_ticks, ticks_to_duration};

/// Callback invoked when a requested wake-up time is reached
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerRequest {
    continuity_key: u32,
    time: i64,
}

impl TimerRequest {
    /// Combine with a request that arrived later
    fn merge(self, newer: TimerRequest) -> TimerRequest {
        if newer.time == TIMER_CANCEL
            || self.time == TIMER_CANCEL
            || newer.continuity_key != self.continuity_key
        {
            newer
        } else {
            TimerRequest {
                time: self.time.min(newer.time),
                ..newer
            }
        }
    }
}

#[derive(Debug, Default)]
struct ArmedTimer {
    handle: Option<TimerHandle>,
    due: Option<i64>,
    generation: u64,

    /// Wake-up requested while the clock was not running
    missed: Option<i64>,
}

/// Clock access and wake-up scheduling for the presenter
pub struct ClockWrapper {
    self_ref: Weak<ClockWrapper>,
    clock: RwLock<Option<Arc<dyn PresentationClock>>>,
    continuity_key: AtomicU32,
    timer: Arc<dyn TimerService>,
    tasks: Arc<TaskQueue>,
    on_wake: WakeCallback,
    arming: AtomicBool,
    parked: Mutex<Option<TimerRequest>>,
    armed: Mutex<ArmedTimer>,
    slack_ticks: i64,
}

impl ClockWrapper {
    /// Create a clockless wrapper
    ///
    /// # Arguments
    ///
    /// * `timer` - Service used to arm wake-ups
    /// * `tasks` - Queue immediate wake-ups are posted to
    /// * `timer_slack` - Requests this close to now fire immediately
    /// * `on_wake` - Called when a requested time is reached
    pub fn new(
        timer: Arc<dyn TimerService>,
        tasks: Arc<TaskQueue>,
        timer_slack: Duration,
        on_wake: WakeCallback,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            clock: RwLock::new(None),
            continuity_key: AtomicU32::new(0),
            timer,
            tasks,
            on_wake,
            arming: AtomicBool::new(false),
            parked: Mutex::new(None),
            armed: Mutex::new(ArmedTimer::default()),
            slack_ticks: duration_to_ticks(timer_slack),
        })
    }

    /// Attach or detach the presentation clock
    pub fn set_clock(&self, clock: Option<Arc<dyn PresentationClock>>) {
        debug!(
            "Presentation clock {}",
            if clock.is_some() { "attached" } else { "detached" }
        );
        *self.clock.write() = clock;
        self.bump_key();
        let mut armed = self.armed.lock();
        self.cancel_locked(&mut armed);
        armed.missed = None;
    }

    /// Whether no clock is attached
    pub fn is_clockless(&self) -> bool {
        self.clock.read().is_none()
    }

    /// Current continuity key
    pub fn continuity_key(&self) -> u32 {
        self.continuity_key.load(Ordering::Acquire)
    }

    /// Read the clock
    pub fn get_time(&self) -> ClockTime {
        let continuity_key = self.continuity_key();
        let clock = self.clock.read().clone();
        match clock {
            Some(clock) => ClockTime {
                time: clock.time(),
                continuity_key,
            },
            None => ClockTime::clockless(continuity_key),
        }
    }

    /// Playback rate of the attached clock
    pub fn rate(&self) -> f32 {
        self.clock.read().as_ref().map_or(1.0, |clock| clock.rate())
    }

    /// Request a wake-up at presentation time `time`
    ///
    /// Never moves an already pending wake-up later. [`TIMER_CANCEL`]
    /// cancels it. Requests tagged with a stale key are ignored.
    pub fn set_timer(&self, continuity_key: u32, time: i64) {
        if continuity_key != self.continuity_key() {
            trace!("Ignoring timer request for stale key {}", continuity_key);
            return;
        }

        {
            let mut parked = self.parked.lock();
            let request = TimerRequest {
                continuity_key,
                time,
            };
            *parked = Some(match parked.take() {
                Some(earlier) => earlier.merge(request),
                None => request,
            });
        }
        self.drain_requests();
    }

    /// Clock started or restarted
    ///
    /// Starts a new continuity period. A wake-up requested while the clock
    /// was not running fires now.
    pub fn clock_started(&self) {
        let key = self.bump_key();
        let missed = {
            let mut armed = self.armed.lock();
            self.cancel_locked(&mut armed);
            armed.missed.take()
        };
        if let Some(time) = missed {
            trace!("Firing wake-up for {} missed while stopped", time);
            self.fire_now(key);
        }
    }

    /// Clock stopped or paused; the pending wake-up is kept as missed
    pub fn clock_stopped(&self) {
        self.bump_key();
        let mut armed = self.armed.lock();
        if let Some(due) = armed.due {
            armed.missed = Some(armed.missed.map_or(due, |missed| missed.min(due)));
        }
        self.cancel_locked(&mut armed);
    }

    /// Cancel everything and invalidate outstanding callbacks
    pub fn shutdown(&self) {
        self.bump_key();
        let mut armed = self.armed.lock();
        self.cancel_locked(&mut armed);
        armed.missed = None;
    }

    /// Due time of the armed timer
    pub fn pending_due(&self) -> Option<i64> {
        self.armed.lock().due
    }

    /// Whether a wake-up is remembered from a stopped period
    pub fn has_missed_wake(&self) -> bool {
        self.armed.lock().missed.is_some()
    }

    fn bump_key(&self) -> u32 {
        self.continuity_key
            .fetch_add(1, Ordering::AcqRel)
            .wrapping_add(1)
    }

    fn drain_requests(&self) {
        loop {
            if self.arming.swap(true, Ordering::AcqRel) {
                // The in-flight setter applies what we parked
                return;
            }

            loop {
                let request = self.parked.lock().take();
                match request {
                    Some(request) => self.apply(request),
                    None => break,
                }
            }

            self.arming.store(false, Ordering::Release);
            if self.parked.lock().is_none() {
                return;
            }
        }
    }

    fn apply(&self, request: TimerRequest) {
        if request.continuity_key != self.continuity_key() {
            trace!("Dropping timer request for stale key {}", request.continuity_key);
            return;
        }

        let mut armed = self.armed.lock();
        if request.time == TIMER_CANCEL {
            self.cancel_locked(&mut armed);
            armed.missed = None;
            return;
        }

        let clock = self.clock.read().clone();
        let Some(clock) = clock else {
            drop(armed);
            self.fire_now(request.continuity_key);
            return;
        };

        if !clock.is_running() {
            armed.missed = Some(armed.missed.map_or(request.time, |m| m.min(request.time)));
            return;
        }

        if let (Some(due), Some(_)) = (armed.due, armed.handle) {
            if due <= request.time {
                trace!("Timer for {} coalesced into pending {}", request.time, due);
                return;
            }
        }

        self.cancel_locked(&mut armed);
        let now = clock.time();
        if request.time <= now.saturating_add(self.slack_ticks) {
            drop(armed);
            self.fire_now(request.continuity_key);
            return;
        }

        let rate = clock.rate();
        let rate = if rate.is_finite() && rate > 0.0 { rate as f64 } else { 1.0 };
        let delay = ticks_to_duration(((request.time - now) as f64 / rate) as i64);

        armed.generation += 1;
        let generation = armed.generation;
        let key = request.continuity_key;
        let weak = self.self_ref.clone();
        let callback = Box::new(move || {
            if let Some(wrapper) = weak.upgrade() {
                wrapper.timer_fired(key, generation);
            }
        });

        match self.timer.schedule(delay, callback) {
            Ok(handle) => {
                armed.handle = Some(handle);
                armed.due = Some(request.time);
            }
            Err(err) => {
                warn!("Failed to arm timer ({}), waking now", err);
                drop(armed);
                self.fire_now(key);
            }
        }
    }

    fn cancel_locked(&self, armed: &mut ArmedTimer) {
        if let Some(handle) = armed.handle.take() {
            self.timer.cancel(handle);
        }
        armed.due = None;
        armed.generation += 1;
    }

    fn timer_fired(&self, key: u32, generation: u64) {
        {
            let mut armed = self.armed.lock();
            if armed.generation != generation {
                return;
            }
            armed.handle = None;
            armed.due = None;
        }

        if key != self.continuity_key() {
            trace!("Dropping timer callback for stale key {}", key);
            return;
        }
        (self.on_wake)();
    }

    fn fire_now(&self, key: u32) {
        let weak = self.self_ref.clone();
        let posted = self.tasks.post(move || {
            if let Some(wrapper) = weak.upgrade() {
                if wrapper.continuity_key() == key {
                    (wrapper.on_wake)();
                }
            }
        });
        if !posted {
            debug!("Wake-up dropped, task queue is shut down");
        }
    }
}

impl std::fmt::Debug for ClockWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockWrapper")
            .field("clockless", &self.is_clockless())
            .field("continuity_key", &self.continuity_key())
            .field("pending_due", &self.pending_due())
            .finish()
    }
}
