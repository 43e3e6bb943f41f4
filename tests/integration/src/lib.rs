//! Integration test utilities for evr-presenter
//!
//! This module provides common utilities for integration testing including:
//! - Scripted and mock mixers
//! - Manual clocks and failing render devices
//! - Event collection and presenter fixtures

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use evr_presenter::clock::PresentationClock;
use evr_presenter::renderer::DeviceError;
use evr_presenter::{
    Config, DeviceFactory, DeviceId, DeviceKind, EvrPresenter, MediaType, Mixer, MixerError,
    PixelFormat, PresenterEvent, PresenterEventSink, RenderDevice, SoftwareDeviceFactory,
    ThreadTimer, VideoSample, VideoSurface,
};
use mockall::mock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Duration of one frame at 25 fps, in ticks
pub const FRAME: i64 = 400_000;

mock! {
    pub FrameMixer {}

    impl Mixer for FrameMixer {
        fn output_type(&self) -> Option<MediaType>;
        fn process_output(&self, target: &mut VideoSample) -> std::result::Result<(), MixerError>;
        fn flush(&self);
    }
}

mock! {
    pub Sink {}

    impl PresenterEventSink for Sink {
        fn on_event(&self, event: PresenterEvent);
    }
}

/// Small RGB media type used throughout the tests
pub fn test_media_type() -> MediaType {
    MediaType::new(8, 4, PixelFormat::Rgb32, (25, 1))
}

/// Mixer replaying a fixed list of frames, then reporting it needs input
pub struct ScriptedMixer {
    media_type: MediaType,
    frames: Mutex<VecDeque<(i64, [u8; 3])>>,
    flushed: AtomicBool,
}

impl ScriptedMixer {
    /// Frames at consecutive frame times starting from `start`
    pub fn sequence(start: i64, count: usize) -> Arc<Self> {
        let frames = (0..count)
            .map(|i| (start + i as i64 * FRAME, [i as u8, 0x40, 0x80]))
            .collect();
        Arc::new(Self {
            media_type: test_media_type(),
            frames: Mutex::new(frames),
            flushed: AtomicBool::new(false),
        })
    }

    /// Queue more frames
    pub fn push(&self, time: i64, color: [u8; 3]) {
        self.frames.lock().push_back((time, color));
    }

    /// Frames not yet handed out
    pub fn remaining(&self) -> usize {
        self.frames.lock().len()
    }

    /// Whether `flush` was called
    pub fn was_flushed(&self) -> bool {
        self.flushed.load(Ordering::SeqCst)
    }
}

impl Mixer for ScriptedMixer {
    fn output_type(&self) -> Option<MediaType> {
        Some(self.media_type)
    }

    fn process_output(&self, target: &mut VideoSample) -> std::result::Result<(), MixerError> {
        let Some((time, color)) = self.frames.lock().pop_front() else {
            return Err(MixerError::NeedMoreInput);
        };
        target.surface_mut().fill(color);
        target.set_timing(time, FRAME);
        Ok(())
    }

    fn flush(&self) {
        self.frames.lock().clear();
        self.flushed.store(true, Ordering::SeqCst);
    }
}

/// Clock whose time only moves when told to
pub struct ManualClock {
    time: AtomicI64,
    running: AtomicBool,
}

impl ManualClock {
    /// A running clock at `time`
    pub fn running_at(time: i64) -> Arc<Self> {
        Arc::new(Self {
            time: AtomicI64::new(time),
            running: AtomicBool::new(true),
        })
    }

    /// Jump to `time`
    pub fn set(&self, time: i64) {
        self.time.store(time, Ordering::SeqCst);
    }

    /// Start or stop
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }
}

impl PresentationClock for ManualClock {
    fn time(&self) -> i64 {
        self.time.load(Ordering::SeqCst)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Hardware device that can be made to fail on demand
#[derive(Debug)]
pub struct SwitchableHardware {
    id: DeviceId,
    failure: Mutex<Option<DeviceError>>,
}

impl SwitchableHardware {
    /// A healthy device
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: DeviceId::next(),
            failure: Mutex::new(None),
        })
    }

    /// Fail every call from now on with `err`
    pub fn fail_with(&self, err: DeviceError) {
        *self.failure.lock() = Some(err);
    }

    fn status(&self) -> std::result::Result<(), DeviceError> {
        match self.failure.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl RenderDevice for SwitchableHardware {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Hardware
    }

    fn create_surface(&self, media_type: &MediaType) -> std::result::Result<VideoSurface, DeviceError> {
        self.status()?;
        Ok(VideoSurface::new(media_type, self.id))
    }

    fn check_status(&self) -> std::result::Result<(), DeviceError> {
        self.status()
    }
}

/// Factory handing out one shared [`SwitchableHardware`]
pub struct SwitchableFactory {
    pub hardware: Arc<SwitchableHardware>,
    pub software_fails: bool,
}

impl DeviceFactory for SwitchableFactory {
    fn create_hardware(&self) -> std::result::Result<Arc<dyn RenderDevice>, DeviceError> {
        Ok(self.hardware.clone())
    }

    fn create_software(&self) -> std::result::Result<Arc<dyn RenderDevice>, DeviceError> {
        if self.software_fails {
            return Err(DeviceError::OutOfVideoMemory);
        }
        SoftwareDeviceFactory.create_software()
    }
}

/// Sink collecting every event on a channel
pub struct CollectingSink {
    sender: Sender<PresenterEvent>,
}

impl CollectingSink {
    /// Create the sink and the receiving end
    pub fn new() -> (Arc<Self>, Receiver<PresenterEvent>) {
        let (sender, receiver) = unbounded();
        (Arc::new(Self { sender }), receiver)
    }
}

impl PresenterEventSink for CollectingSink {
    fn on_event(&self, event: PresenterEvent) {
        let _ = self.sender.send(event);
    }
}

/// Wait until `predicate` accepts an event or `timeout` elapses
pub fn wait_for_event<F>(events: &Receiver<PresenterEvent>, timeout: Duration, mut predicate: F) -> bool
where
    F: FnMut(&PresenterEvent) -> bool,
{
    let deadline = Instant::now() + timeout;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(remaining) {
            Ok(event) if predicate(&event) => return true,
            Ok(_) => continue,
            Err(_) => return false,
        }
    }
    false
}

/// Presenter rendering in software with a real timer thread
pub fn software_presenter() -> Result<Arc<EvrPresenter>> {
    presenter_with(Config::default(), Arc::new(SoftwareDeviceFactory))
}

/// Presenter with explicit configuration and devices
pub fn presenter_with(config: Config, factory: Arc<dyn DeviceFactory>) -> Result<Arc<EvrPresenter>> {
    let timer = Arc::new(ThreadTimer::new()?);
    Ok(EvrPresenter::new(&config, factory, timer)?)
}

/// Performance measurement utilities
pub mod perf_test {
    use std::time::{Duration, Instant};

    pub struct PerfMeasure {
        name: String,
        start: Instant,
        measurements: Vec<Duration>,
    }

    impl PerfMeasure {
        pub fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                start: Instant::now(),
                measurements: Vec::new(),
            }
        }

        pub fn start(&mut self) {
            self.start = Instant::now();
        }

        pub fn stop(&mut self) {
            self.measurements.push(self.start.elapsed());
        }

        pub fn average(&self) -> Duration {
            if self.measurements.is_empty() {
                return Duration::ZERO;
            }

            let sum: Duration = self.measurements.iter().sum();
            sum / self.measurements.len() as u32
        }

        pub fn max(&self) -> Option<Duration> {
            self.measurements.iter().max().copied()
        }

        pub fn report(&self) {
            println!("Performance Report: {}", self.name);
            println!("  Samples: {}", self.measurements.len());
            println!("  Average: {:?}", self.average());
            println!("  Max: {:?}", self.max().unwrap_or(Duration::ZERO));
        }
    }
}
