//! Mixer-side presenter
//!
//! Pulls frames from the mixer into the sample queue whenever input is
//! available or a scheduled wake-up fires, follows the presentation clock's
//! state changes and recovers from render device failures.

use log::{debug, error, info, trace, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::clock::{ClockTime, ClockWrapper, PresentationClock, TimerService, WakeCallback};
use crate::decoder::{Mixer, MixerError};
use crate::events::{EventProxy, PresenterEvent, PresenterEventSink, TaskQueue};
use crate::presenter::{
    AVSurfaceRenderer, ClockSink, DisplayControl, PendingFallback, PresenterCore,
    PresenterMessage, PresenterService, PresenterState, PresenterStats, RateControl,
    RenderCounters, ServiceKind, ServiceProvider,
};
use crate::queue::{ProducerAcquire, ProducerRelease, SAMPLE_TIME_INVALID};
use crate::renderer::{DeviceError, DeviceFactory, DeviceManager, FallbackOutcome, VideoSurface};
use crate::scheduler::{SampleScheduler, WakeTime};
use crate::utils::config::Config;
use crate::utils::error::{PresenterError, Result};
use crate::utils::format_ticks;

/// Fastest forward rate with every frame shown
const MAX_RATE: f32 = 8.0;

/// Fastest forward rate when the source may drop frames
const MAX_THIN_RATE: f32 = 32.0;

/// How long shutdown waits for queued events to be delivered
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(500);

/// How a device error was resolved
enum DeviceRecovery {
    /// The current device changed; retry on it
    Switched,

    /// Try again on the next callback
    Retry,
}

/// Video presenter driven by the presentation clock and the mixer
pub struct EvrPresenter {
    core: Arc<PresenterCore>,
    renderer: Arc<AVSurfaceRenderer>,
    tasks: Arc<TaskQueue>,
    state: Mutex<PresenterState>,
    mixer: RwLock<Option<Arc<dyn Mixer>>>,

    /// Producer-role serialization
    processing: AtomicBool,
    rerun: AtomicBool,

    /// The mixer signalled input and has not reported needing more
    input_available: AtomicBool,
    streaming: AtomicBool,

    /// Time of the frame last announced with `NewFrame`
    last_notified: AtomicI64,

    /// `FallbackFailure` is raised once
    fallback_failed: AtomicBool,

    force_clockless: bool,
}

impl EvrPresenter {
    /// Create a stopped presenter
    ///
    /// # Arguments
    ///
    /// * `config` - Presenter and clock settings
    /// * `factory` - Creates the hardware and software render devices
    /// * `timer` - Service scheduled wake-ups are armed on
    ///
    /// # Returns
    ///
    /// Returns the presenter, or an error if no render device is usable
    pub fn new(
        config: &Config,
        factory: Arc<dyn DeviceFactory>,
        timer: Arc<dyn TimerService>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let tasks = Arc::new(TaskQueue::new("presenter-events")?);
        let devices = DeviceManager::new(factory, config.presenter.software_fallback_enabled)?;

        let scheduler = SampleScheduler::new(Duration::from_millis(
            config.presenter.late_sample_tolerance_ms,
        ));
        scheduler.invalidate_device(devices.current());

        let presenter = Arc::new_cyclic(|weak: &Weak<EvrPresenter>| {
            let target = weak.clone();
            let on_wake: WakeCallback = Arc::new(move || {
                if let Some(presenter) = target.upgrade() {
                    presenter.on_wake();
                }
            });
            let clock = ClockWrapper::new(
                timer,
                Arc::clone(&tasks),
                Duration::from_micros(config.clock.timer_slack_us),
                on_wake,
            );

            let core = Arc::new(PresenterCore {
                config: config.presenter.clone(),
                scheduler,
                devices,
                clock,
                events: EventProxy::new(Arc::clone(&tasks)),
                pending_fallback: Mutex::new(None),
                counters: RenderCounters::default(),
            });

            EvrPresenter {
                renderer: Arc::new(AVSurfaceRenderer::new(Arc::clone(&core))),
                core,
                tasks,
                state: Mutex::new(PresenterState::Stopped),
                mixer: RwLock::new(None),
                processing: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
                input_available: AtomicBool::new(false),
                streaming: AtomicBool::new(false),
                last_notified: AtomicI64::new(SAMPLE_TIME_INVALID),
                fallback_failed: AtomicBool::new(false),
                force_clockless: config.clock.clockless,
            }
        });

        info!(
            "Presenter created on {} ({})",
            presenter.core.devices.current().id(),
            if presenter.core.devices.is_software() { "software" } else { "hardware" }
        );
        Ok(presenter)
    }

    /// Attach or detach the upstream mixer
    ///
    /// The output type is renegotiated on the next processing pass.
    pub fn set_mixer(&self, mixer: Option<Arc<dyn Mixer>>) -> Result<()> {
        self.ensure_running()?;
        *self.mixer.write() = mixer;
        self.core.scheduler.change_media_type(None);
        Ok(())
    }

    /// Attach or detach the presentation clock
    ///
    /// Ignored when the configuration forces clockless operation.
    pub fn set_clock(&self, clock: Option<Arc<dyn PresentationClock>>) -> Result<()> {
        self.ensure_running()?;
        if self.force_clockless && clock.is_some() {
            debug!("Clockless mode forced, ignoring presentation clock");
            return Ok(());
        }
        self.core.clock.set_clock(clock);
        Ok(())
    }

    /// Attach or detach the host event sink
    pub fn set_event_sink(&self, sink: Option<Arc<dyn PresenterEventSink>>) {
        self.core.events.set_sink(sink);
    }

    /// Compositor entry points
    pub fn renderer(&self) -> Arc<AVSurfaceRenderer> {
        Arc::clone(&self.renderer)
    }

    /// Scheduler and its queue
    pub fn scheduler(&self) -> &SampleScheduler {
        &self.core.scheduler
    }

    /// Current lifecycle state
    pub fn state(&self) -> PresenterState {
        *self.state.lock()
    }

    /// Counters for logging and the demo's stats dump
    pub fn stats(&self) -> PresenterStats {
        self.core.stats(self.state())
    }

    /// Wait until queued events have been delivered
    pub fn sync_events(&self, timeout: Duration) -> bool {
        self.tasks.sync(timeout)
    }

    /// Handle a pipeline message
    pub fn process_message(&self, message: PresenterMessage) -> Result<()> {
        self.ensure_running()?;
        debug!("Presenter message {:?}", message);

        match message {
            PresenterMessage::Flush => {
                let now = self.core.clock.get_time();
                self.core.scheduler.flush(now);
                let mixer = self.mixer.read().clone();
                if let Some(mixer) = mixer {
                    mixer.flush();
                }
                self.last_notified.store(SAMPLE_TIME_INVALID, Ordering::SeqCst);
                Ok(())
            }
            PresenterMessage::InvalidateMediaType => {
                self.core.scheduler.change_media_type(None);
                let mixer = self.mixer.read().clone();
                match mixer {
                    Some(mixer) => self.negotiate_media_type(mixer.as_ref()).map(|_| ()),
                    None => Ok(()),
                }
            }
            PresenterMessage::ProcessInputNotify => {
                self.input_available.store(true, Ordering::SeqCst);
                self.process_samples()
            }
            PresenterMessage::BeginStreaming => {
                self.streaming.store(true, Ordering::SeqCst);
                Ok(())
            }
            PresenterMessage::EndStreaming => {
                self.streaming.store(false, Ordering::SeqCst);
                Ok(())
            }
            PresenterMessage::EndOfStream => {
                self.core.scheduler.set_end_of_stream(true);
                self.input_available.store(false, Ordering::SeqCst);
                self.process_samples()
            }
        }
    }

    /// Drain available mixer output into the queue and schedule the next wake
    ///
    /// A call made while another is in progress only requests a re-run; the
    /// in-progress call performs it before returning.
    pub fn process_samples(&self) -> Result<()> {
        self.ensure_running()?;

        self.rerun.store(true, Ordering::SeqCst);
        if self.processing.swap(true, Ordering::SeqCst) {
            trace!("Processing in progress, re-run requested");
            return Ok(());
        }

        loop {
            self.rerun.store(false, Ordering::SeqCst);
            let result = self.process_samples_once();
            self.processing.store(false, Ordering::SeqCst);

            if !self.rerun.load(Ordering::SeqCst) || self.processing.swap(true, Ordering::SeqCst) {
                return result;
            }
            self.core.log_discarded("Processing pass failed before re-run", result);
        }
    }

    /// Pin the frame at `time` while scrubbing
    pub fn scrub_to(&self, time: i64) -> Result<()> {
        self.ensure_running()?;
        if !self.core.scheduler.is_scrubbing() {
            return Err(PresenterError::InvalidState("not scrubbing".to_string()));
        }
        let key = self.core.clock.continuity_key();
        let pinned = self.core.scheduler.scrub_to(ClockTime {
            time,
            continuity_key: key,
        });
        trace!("Scrubbed to {} on slot {:?}", format_ticks(time), pinned);
        self.core.events.raise(PresenterEvent::NewFrame);
        Ok(())
    }

    /// Hold the current frame while the clock keeps running
    pub fn set_fake_pause(&self, enabled: bool) -> Result<()> {
        self.ensure_running()?;
        let now = self.core.clock.get_time();
        self.core.scheduler.set_fake_pause(enabled, now);
        if !enabled {
            self.core.log_discarded("Processing after fake pause", self.process_samples());
        }
        Ok(())
    }

    /// Keep the last frame on screen across a stop instead of flushing
    pub fn set_stop_to_pause_freeze(&self, enabled: bool) {
        self.core.scheduler.set_stop_to_pause_freeze(enabled);
    }

    /// Shut the presenter down; further calls fail with `Shutdown`
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if *state == PresenterState::Shutdown {
                return;
            }
            *state = PresenterState::Shutdown;
        }

        info!("Shutting down presenter");
        self.core.clock.shutdown();
        *self.mixer.write() = None;
        self.core.events.raise(PresenterEvent::StateReached(PresenterState::Shutdown));
        if !self.tasks.is_current() && !self.tasks.sync(SHUTDOWN_DRAIN) {
            debug!("Events still pending at shutdown");
        }
        self.core.events.set_sink(None);
        self.tasks.shutdown();
    }

    fn on_wake(&self) {
        if self.state() == PresenterState::Shutdown {
            return;
        }
        self.core.log_discarded("Scheduled processing failed", self.process_samples());
    }

    fn ensure_running(&self) -> Result<()> {
        if self.state() == PresenterState::Shutdown {
            Err(PresenterError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn transition(&self, next: PresenterState) -> Result<PresenterState> {
        let mut state = self.state.lock();
        if *state == PresenterState::Shutdown {
            return Err(PresenterError::Shutdown);
        }
        if !state.can_transition_to(next) {
            return Err(PresenterError::InvalidState(format!(
                "cannot move from {:?} to {:?}",
                *state, next
            )));
        }
        let previous = std::mem::replace(&mut *state, next);
        debug!("Presenter {:?} -> {:?}", previous, next);
        Ok(previous)
    }

    fn process_samples_once(&self) -> Result<()> {
        let core = &self.core;
        let mut fell_back = false;

        if let Err(err) = core.devices.current().check_status() {
            if let DeviceRecovery::Switched = self.handle_device_error(err)? {
                fell_back = true;
            }
        }

        let mixer = self.mixer.read().clone();
        if let Some(mixer) = mixer {
            if core.scheduler.queue().media_type().is_some()
                || self.negotiate_media_type(mixer.as_ref())?
            {
                fell_back |= self.drain_mixer(mixer.as_ref())?;
            }
        }

        let now = core.clock.get_time();
        self.notify_new_frame(now);

        if core.scheduler.check_media_finished(now) {
            info!("Media finished");
            core.events.raise(PresenterEvent::MediaFinished);
        }

        match core.scheduler.next_wake(now) {
            WakeTime::At(time) => {
                trace!("Next wake at {}", format_ticks(time));
                core.clock.set_timer(now.continuity_key, time);
            }
            WakeTime::Immediate => core.clock.set_timer(now.continuity_key, now.time),
            WakeTime::Never if fell_back => {
                debug!("Nothing scheduled after fallback, forcing a composition");
                core.events.raise(PresenterEvent::NewFrame);
            }
            WakeTime::Never => {}
        }
        Ok(())
    }

    /// Pull frames until the mixer runs dry or the queue is full
    ///
    /// # Returns
    ///
    /// Returns true if the render device fell back to software
    fn drain_mixer(&self, mixer: &dyn Mixer) -> Result<bool> {
        let scheduler = &self.core.scheduler;
        let mut fell_back = false;

        while self.input_available.load(Ordering::SeqCst) {
            let now = self.core.clock.get_time();
            let mut sample = match scheduler.get_mix_sample(now) {
                Ok(ProducerAcquire::Acquired(sample)) => sample,
                Ok(ProducerAcquire::Full) => {
                    trace!("Queue full");
                    break;
                }
                Ok(ProducerAcquire::WaitingForComposition) => {
                    trace!("Waiting for the compositor to release a slot");
                    break;
                }
                Err(PresenterError::Device(err)) => match self.handle_device_error(err)? {
                    DeviceRecovery::Switched => {
                        fell_back = true;
                        continue;
                    }
                    DeviceRecovery::Retry => break,
                },
                Err(PresenterError::MediaTypeNotSet) => {
                    if self.negotiate_media_type(mixer)? {
                        continue;
                    }
                    break;
                }
                Err(err) => return Err(err),
            };

            match mixer.process_output(sample.sample_mut()) {
                Ok(()) => {
                    let time = sample.sample().time;
                    let outcome = scheduler.return_mix_sample(self.core.clock.get_time(), sample);
                    match outcome {
                        ProducerRelease::Queued { due } => {
                            trace!("Queued sample {} (due: {})", format_ticks(time), due)
                        }
                        ProducerRelease::Discarded => {
                            debug!("Sample {} discarded", format_ticks(time))
                        }
                    }
                }
                Err(MixerError::NeedMoreInput) => {
                    scheduler.abandon_mix_sample(sample);
                    self.input_available.store(false, Ordering::SeqCst);
                }
                Err(MixerError::StreamChanged) => {
                    scheduler.abandon_mix_sample(sample);
                    info!("Stream changed, clearing media type");
                    scheduler.change_media_type(None);
                    return Err(PresenterError::StreamChanged);
                }
                Err(MixerError::Device(err)) => {
                    scheduler.abandon_mix_sample(sample);
                    match self.handle_device_error(err)? {
                        DeviceRecovery::Switched => fell_back = true,
                        DeviceRecovery::Retry => break,
                    }
                }
                Err(err @ MixerError::Failed(_)) => {
                    scheduler.abandon_mix_sample(sample);
                    return Err(PresenterError::Mixer(err));
                }
            }
        }
        Ok(fell_back)
    }

    /// Adopt the mixer's proposed output type
    ///
    /// # Returns
    ///
    /// Returns false if the mixer has no type to offer yet
    fn negotiate_media_type(&self, mixer: &dyn Mixer) -> Result<bool> {
        let Some(media_type) = mixer.output_type() else {
            debug!("Mixer offers no output type yet");
            return Ok(false);
        };
        media_type.validate()?;

        info!(
            "Negotiated {}x{} {:?} at {}/{} fps",
            media_type.width,
            media_type.height,
            media_type.format,
            media_type.frame_rate.0,
            media_type.frame_rate.1
        );
        self.core.scheduler.change_media_type(Some(media_type));
        self.core.events.raise(PresenterEvent::MediaTypeChanged(media_type));
        Ok(true)
    }

    fn handle_device_error(&self, err: DeviceError) -> Result<DeviceRecovery> {
        match self.core.devices.handle_error(&err) {
            FallbackOutcome::Retry => Ok(DeviceRecovery::Retry),
            FallbackOutcome::SwitchedToSoftware(device) => {
                self.core.switch_device(device);
                self.core.set_pending_fallback(PendingFallback::Switched(err));
                Ok(DeviceRecovery::Switched)
            }
            FallbackOutcome::Exhausted(cause) => {
                let message = format!("no usable render device after {}", cause);
                error!("Software fallback failed: {}", message);
                self.core.set_pending_fallback(PendingFallback::Exhausted(message.clone()));
                if !self.fallback_failed.swap(true, Ordering::SeqCst) {
                    self.core
                        .events
                        .raise(PresenterEvent::FallbackFailure(message.clone()));
                }
                Err(PresenterError::FallbackExhausted(message))
            }
            FallbackOutcome::Fatal(err) => Err(PresenterError::Device(err)),
        }
    }

    /// Announce a frame once it becomes the one to display
    fn notify_new_frame(&self, now: ClockTime) {
        let view = self.core.scheduler.queue().snapshot();
        let Some(slot) = view.choose_composition(now.schedule_time()) else {
            return;
        };
        let time = view.sample_times[slot];
        if self.last_notified.swap(time, Ordering::SeqCst) != time {
            trace!("New frame {} in slot {}", format_ticks(time), slot);
            self.core.events.raise(PresenterEvent::NewFrame);
        }
    }

    fn resume(&self, offset: Option<i64>, previous: PresenterState) {
        let core = &self.core;
        let was_frozen = core.scheduler.is_frozen();
        core.scheduler.unfreeze();

        if offset.is_some() && (previous != PresenterState::Stopped || was_frozen) {
            let now = core.clock.get_time();
            debug!("Start from a new position, flushing");
            core.scheduler.flush(now);
            self.last_notified.store(SAMPLE_TIME_INVALID, Ordering::SeqCst);
        }

        core.scheduler.unpause();
        core.clock.clock_started();
        core.events.raise(PresenterEvent::StateReached(PresenterState::Started));
        core.log_discarded("Processing after clock start", self.process_samples());
    }
}

impl ClockSink for EvrPresenter {
    fn on_clock_start(&self, offset: Option<i64>) -> Result<()> {
        let previous = self.transition(PresenterState::Started)?;
        info!(
            "Clock started{}",
            offset.map_or(String::new(), |offset| format!(" at {}", format_ticks(offset)))
        );
        self.resume(offset, previous);
        Ok(())
    }

    fn on_clock_stop(&self) -> Result<()> {
        self.transition(PresenterState::Stopped)?;
        let core = &self.core;
        let now = core.clock.get_time();

        if core.scheduler.stop_to_pause_freeze() {
            core.scheduler.freeze_for_stop(now);
        } else {
            core.scheduler.flush(now);
            self.last_notified.store(SAMPLE_TIME_INVALID, Ordering::SeqCst);
        }
        core.clock.clock_stopped();
        core.events.raise(PresenterEvent::StateReached(PresenterState::Stopped));
        info!("Clock stopped");
        Ok(())
    }

    fn on_clock_pause(&self) -> Result<()> {
        self.transition(PresenterState::Paused)?;
        let core = &self.core;
        let pinned = core.scheduler.pause(core.clock.get_time());
        core.clock.clock_stopped();
        core.events.raise(PresenterEvent::StateReached(PresenterState::Paused));
        info!("Clock paused on slot {:?}", pinned);
        Ok(())
    }

    fn on_clock_restart(&self) -> Result<()> {
        {
            let state = self.state.lock();
            match *state {
                PresenterState::Shutdown => return Err(PresenterError::Shutdown),
                PresenterState::Paused => {}
                other => {
                    return Err(PresenterError::InvalidState(format!(
                        "restart from {:?}",
                        other
                    )))
                }
            }
        }
        let previous = self.transition(PresenterState::Started)?;
        info!("Clock restarted");
        self.resume(None, previous);
        Ok(())
    }

    fn on_clock_set_rate(&self, rate: f32) -> Result<()> {
        self.ensure_running()?;
        let scheduler = &self.core.scheduler;

        if rate == 0.0 {
            scheduler.begin_scrub();
        } else {
            self.is_rate_supported(false, rate)?;
            if scheduler.is_scrubbing() {
                scheduler.end_scrub();
            }
        }
        info!("Clock rate set to {}", rate);

        // Armed timers were computed for the old rate
        if self.state() == PresenterState::Started {
            self.core.clock.clock_started();
            self.core.log_discarded("Processing after rate change", self.process_samples());
        }
        Ok(())
    }
}

impl RateControl for EvrPresenter {
    fn supported_rates(&self, thin: bool) -> (f32, f32) {
        (0.0, if thin { MAX_THIN_RATE } else { MAX_RATE })
    }

    fn is_rate_supported(&self, thin: bool, rate: f32) -> Result<f32> {
        let (slowest, fastest) = self.supported_rates(thin);
        if rate.is_finite() && rate >= slowest && rate <= fastest {
            Ok(rate)
        } else {
            Err(PresenterError::UnsupportedRate(rate))
        }
    }
}

impl DisplayControl for EvrPresenter {
    fn native_video_size(&self) -> Option<(u32, u32)> {
        self.core
            .scheduler
            .queue()
            .media_type()
            .map(|media_type| (media_type.width, media_type.height))
    }

    fn current_image(&self) -> Option<VideoSurface> {
        self.renderer.last_presented()
    }
}

impl ServiceProvider for EvrPresenter {
    fn service(&self, kind: ServiceKind) -> Option<PresenterService> {
        match kind {
            ServiceKind::SurfaceRenderer => {
                Some(PresenterService::SurfaceRenderer(self.renderer()))
            }
            ServiceKind::RenderDevice => {
                Some(PresenterService::RenderDevice(self.core.devices.current()))
            }
            ServiceKind::VideoProcessor => None,
        }
    }
}

impl Drop for EvrPresenter {
    fn drop(&mut self) {
        if self.state() != PresenterState::Shutdown {
            warn!("Presenter dropped without shutdown");
            self.shutdown();
        }
    }
}

impl std::fmt::Debug for EvrPresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvrPresenter")
            .field("state", &self.state())
            .field("streaming", &self.streaming.load(Ordering::Relaxed))
            .field("clock", &self.core.clock)
            .finish()
    }
}
