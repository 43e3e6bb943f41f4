//! Presenter module
//!
//! The presenter is split along the two threads that drive it:
//! - [`EvrPresenter`] runs on the mixer side. It reacts to clock state
//!   changes and pipeline messages, pulls frames from the mixer into the
//!   sample queue and schedules its own wake-ups.
//! - [`AVSurfaceRenderer`] runs on the compositor side. It hands the frame
//!   due for each composition pass to the compositor and returns it after.
//!
//! Both share a [`PresenterCore`] holding the scheduler, the device
//! manager, the clock wrapper and the event proxy.

mod evr_presenter;
mod surface_renderer;

pub use evr_presenter::EvrPresenter;
pub use surface_renderer::{AVSurfaceRenderer, CompositionResource, CompositionStatus};

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::clock::ClockWrapper;
use crate::events::EventProxy;
use crate::queue::QueueStats;
use crate::renderer::{DeviceError, DeviceManager, RenderDevice, VideoSurface};
use crate::scheduler::SampleScheduler;
use crate::utils::config::PresenterConfig;
use crate::utils::error::{PresenterError, Result};

/// Presenter lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenterState {
    /// Clock stopped
    Stopped,

    /// Clock running
    Started,

    /// Clock paused
    Paused,

    /// Terminal
    Shutdown,
}

impl PresenterState {
    /// Whether a clock notification may move the presenter to `next`
    pub fn can_transition_to(self, next: PresenterState) -> bool {
        match (self, next) {
            (PresenterState::Shutdown, _) => false,
            (_, PresenterState::Shutdown) => true,
            // Restart only resumes a pause; start is used from stop
            (PresenterState::Stopped, PresenterState::Started)
            | (PresenterState::Paused, PresenterState::Started)
            | (PresenterState::Started, PresenterState::Started) => true,
            (_, PresenterState::Paused) | (_, PresenterState::Stopped) => true,
        }
    }
}

/// Clock state notifications
pub trait ClockSink {
    /// Clock started, optionally from a new position
    fn on_clock_start(&self, offset: Option<i64>) -> Result<()>;

    /// Clock stopped
    fn on_clock_stop(&self) -> Result<()>;

    /// Clock paused
    fn on_clock_pause(&self) -> Result<()>;

    /// Clock resumed from pause
    fn on_clock_restart(&self) -> Result<()>;

    /// Playback rate changed; zero means scrubbing
    fn on_clock_set_rate(&self, rate: f32) -> Result<()>;
}

/// Playback rate negotiation
pub trait RateControl {
    /// Slowest and fastest supported forward rates
    fn supported_rates(&self, thin: bool) -> (f32, f32);

    /// Check a rate
    ///
    /// # Returns
    ///
    /// Returns the rate if supported, otherwise `UnsupportedRate`
    fn is_rate_supported(&self, thin: bool, rate: f32) -> Result<f32>;
}

/// Video window queries
pub trait DisplayControl {
    /// Native size of the negotiated video
    fn native_video_size(&self) -> Option<(u32, u32)>;

    /// Copy of the frame last handed to the compositor
    fn current_image(&self) -> Option<VideoSurface>;
}

/// Services a presenter can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// The compositor-side renderer
    SurfaceRenderer,

    /// The current render device
    RenderDevice,

    /// A hardware video processor; not provided
    VideoProcessor,
}

/// A service returned by [`ServiceProvider::service`]
#[derive(Debug, Clone)]
pub enum PresenterService {
    /// Compositor entry points
    SurfaceRenderer(Arc<AVSurfaceRenderer>),

    /// Device new buffers are allocated on
    RenderDevice(Arc<dyn RenderDevice>),
}

/// Service lookup
pub trait ServiceProvider {
    /// Look up a service; None if not provided
    fn service(&self, kind: ServiceKind) -> Option<PresenterService>;
}

/// Pipeline messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenterMessage {
    /// Drop queued frames
    Flush,

    /// The mixer's output type must be renegotiated
    InvalidateMediaType,

    /// The mixer has new input
    ProcessInputNotify,

    /// Streaming is about to begin
    BeginStreaming,

    /// Streaming has ended
    EndStreaming,

    /// No more input will arrive
    EndOfStream,
}

/// Presenter counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenterStats {
    /// Lifecycle state
    pub state: PresenterState,

    /// Whether rendering fell back to software
    pub software_rendering: bool,

    /// Composition passes that got a new frame
    pub frames_presented: u64,

    /// Composition passes that repeated the previous frame
    pub frames_repeated: u64,

    /// Black placeholders handed out
    pub placeholders: u64,

    /// Software fallbacks
    pub fallbacks: u64,

    /// Device migrations
    pub migrations: u64,

    /// Samples that arrived late
    pub late_samples: u64,

    /// Sample queue counters
    pub queue: QueueStats,
}

/// Fallback news for the compositor
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingFallback {
    /// Now rendering in software because of this error
    Switched(DeviceError),

    /// No device left to render with
    Exhausted(String),
}

#[derive(Debug, Default)]
pub(crate) struct RenderCounters {
    pub(crate) frames_presented: AtomicU64,
    pub(crate) frames_repeated: AtomicU64,
    pub(crate) placeholders: AtomicU64,
}

impl RenderCounters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared by the mixer and compositor sides
pub(crate) struct PresenterCore {
    pub(crate) config: PresenterConfig,
    pub(crate) scheduler: SampleScheduler,
    pub(crate) devices: DeviceManager,
    pub(crate) clock: Arc<ClockWrapper>,
    pub(crate) events: EventProxy,
    pub(crate) pending_fallback: Mutex<Option<PendingFallback>>,
    pub(crate) counters: RenderCounters,
}

impl PresenterCore {
    /// Record fallback news; exhaustion is never overwritten by a switch
    pub(crate) fn set_pending_fallback(&self, fallback: PendingFallback) {
        let mut pending = self.pending_fallback.lock();
        if matches!(*pending, Some(PendingFallback::Exhausted(_)))
            && matches!(fallback, PendingFallback::Switched(_))
        {
            return;
        }
        *pending = Some(fallback);
    }

    /// Take a pending switch; exhaustion stays pending and is reported as an error
    pub(crate) fn take_switched_fallback(&self) -> Result<Option<DeviceError>> {
        let mut pending = self.pending_fallback.lock();
        match pending.take() {
            Some(PendingFallback::Exhausted(message)) => {
                *pending = Some(PendingFallback::Exhausted(message.clone()));
                Err(PresenterError::FallbackExhausted(message))
            }
            Some(PendingFallback::Switched(err)) => Ok(Some(err)),
            None => Ok(None),
        }
    }

    /// Wake the mixer as soon as possible
    pub(crate) fn wake_mixer(&self) {
        let now = self.clock.get_time();
        // Clockless readings fire immediately regardless of the time
        let time = if now.is_valid() { now.time } else { 0 };
        self.clock.set_timer(now.continuity_key, time);
    }

    /// Allocate future buffers on `device`
    pub(crate) fn switch_device(&self, device: Arc<dyn RenderDevice>) {
        self.scheduler.invalidate_device(device);
    }

    pub(crate) fn stats(&self, state: PresenterState) -> PresenterStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        PresenterStats {
            state,
            software_rendering: self.devices.is_software(),
            frames_presented: load(&self.counters.frames_presented),
            frames_repeated: load(&self.counters.frames_repeated),
            placeholders: load(&self.counters.placeholders),
            fallbacks: self.devices.fallback_count(),
            migrations: self.devices.migration_count(),
            late_samples: self.scheduler.late_sample_count(),
            queue: self.scheduler.queue_stats(),
        }
    }

    pub(crate) fn log_discarded(&self, context: &str, result: Result<()>) {
        if let Err(err) = result {
            if err.is_transient() {
                debug!("{}: {}", context, err);
            } else {
                warn!("{}: {}", context, err);
            }
        }
    }
}
