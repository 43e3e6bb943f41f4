use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};

use evr_presenter::renderer::DeviceError;
use evr_presenter::utils::TICKS_PER_SECOND;
use evr_presenter::{
    ClockSink, CompositionResource, Config, DeviceFactory, DeviceId, DeviceKind, EvrPresenter,
    MediaType, Mixer, MixerError, PixelFormat, PresenterEvent, PresenterEventSink,
    PresenterMessage, PresenterService, RenderDevice, ServiceKind, ServiceProvider, SystemClock,
    ThreadTimer, VideoSample, VideoSurface,
};

/// evr-presenter - plays a synthetic video stream through the presenter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Seconds of video to play
    #[arg(long, default_value = "3")]
    duration: u64,

    /// Frames per second of the synthetic stream
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Compositor passes per second
    #[arg(long, default_value = "60")]
    refresh: u32,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Make the hardware device fail after this many frames
    #[arg(long, value_name = "FRAMES")]
    fail_device_after: Option<u64>,

    /// Present every frame as soon as it is mixed
    #[arg(long)]
    clockless: bool,

    /// Print the final statistics as JSON
    #[arg(long)]
    stats_json: bool,

    /// Configuration file to use instead of the default locations
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    info!("Starting evr-presenter v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if args.clockless {
        config.clock.clockless = true;
    }
    config.validate()?;

    let fps = args.fps.max(1);
    let total_frames = args.duration * fps as u64;
    let mixed = Arc::new(AtomicU64::new(0));

    let factory = Arc::new(DemoDeviceFactory {
        mixed: Arc::clone(&mixed),
        fail_after: args.fail_device_after,
    });
    let timer = Arc::new(ThreadTimer::new()?);
    let presenter = EvrPresenter::new(&config, factory, timer)?;

    let (events_tx, mut events) = unbounded_channel();
    presenter.set_event_sink(Some(Arc::new(ForwardingSink(events_tx))));

    let mixer = Arc::new(SyntheticMixer::new(
        MediaType::new(320, 180, PixelFormat::Rgb32, (fps, 1)),
        Arc::clone(&mixed),
    ));
    presenter.set_mixer(Some(mixer.clone()))?;

    let clock = Arc::new(SystemClock::new());
    presenter.set_clock(Some(clock.clone()))?;
    presenter.process_message(PresenterMessage::BeginStreaming)?;
    clock.start(Some(0));
    presenter.on_clock_start(Some(0))?;

    // Upstream source: one input per frame interval, a few frames ahead
    let source = {
        let presenter = Arc::clone(&presenter);
        let mixer = Arc::clone(&mixer);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1) / fps);
            for fed in 0..total_frames {
                if fed >= 3 {
                    ticker.tick().await;
                }
                mixer.add_input();
                if let Err(e) = presenter.process_message(PresenterMessage::ProcessInputNotify) {
                    warn!("Processing input failed: {}", e);
                }
            }
            if let Err(e) = presenter.process_message(PresenterMessage::EndOfStream) {
                warn!("End of stream failed: {}", e);
            }
            debug!("Source finished after {} frames", total_frames);
        })
    };

    // Compositor: one pass per refresh interval
    let resource = CompositionResource::new();
    let mut vsync = tokio::time::interval(Duration::from_secs(1) / args.refresh.max(1));
    let deadline = tokio::time::sleep(Duration::from_secs(args.duration + 2));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = vsync.tick() => {
                if let Err(e) = composition_pass(&presenter, &resource) {
                    error!("Composition failed: {}", e);
                    break;
                }
            }
            Some(event) = events.recv() => {
                match event {
                    PresenterEvent::MediaFinished => {
                        info!("Media finished");
                        break;
                    }
                    PresenterEvent::FallbackFailure(message) => {
                        error!("Rendering failed: {}", message);
                        break;
                    }
                    PresenterEvent::StateReached(state) => info!("Presenter {:?}", state),
                    PresenterEvent::MediaTypeChanged(media_type) => {
                        info!("Output {}x{}", media_type.width, media_type.height)
                    }
                    PresenterEvent::NewFrame => {}
                }
            }
            _ = &mut deadline => {
                warn!("Playback did not finish in time");
                break;
            }
        }
    }

    source.abort();
    clock.stop();
    presenter.on_clock_stop()?;
    presenter.process_message(PresenterMessage::EndStreaming)?;
    let stats = presenter.stats();
    presenter.shutdown();

    if args.stats_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        info!(
            "Presented {} frames ({} repeated, {} placeholders, {} late), {} fallbacks",
            stats.frames_presented,
            stats.frames_repeated,
            stats.placeholders,
            stats.late_samples,
            stats.fallbacks
        );
    }
    Ok(())
}

fn composition_pass(presenter: &EvrPresenter, resource: &CompositionResource) -> evr_presenter::Result<()> {
    let renderer = presenter.renderer();
    let status = renderer.begin_composition(resource)?;
    if let Some(err) = &status.software_fallback {
        warn!("Compositor now receiving software frames ({})", err);
    }

    let result = match presenter.service(ServiceKind::RenderDevice) {
        Some(PresenterService::RenderDevice(device)) => renderer.begin_render(&device).and_then(|surface| {
            if status.new_frame {
                debug!("Showing {}x{} frame from {}", surface.width, surface.height, surface.device);
            }
            renderer.end_render()
        }),
        _ => Ok(()),
    };

    renderer.end_composition(resource)?;
    result
}

/// Forwards presenter events to the main loop
struct ForwardingSink(UnboundedSender<PresenterEvent>);

impl PresenterEventSink for ForwardingSink {
    fn on_event(&self, event: PresenterEvent) {
        let _ = self.0.send(event);
    }
}

/// Mixer producing solid-color frames, one per input
struct SyntheticMixer {
    media_type: MediaType,
    pending: AtomicU64,
    next_frame: AtomicU64,
    mixed: Arc<AtomicU64>,
}

impl SyntheticMixer {
    fn new(media_type: MediaType, mixed: Arc<AtomicU64>) -> Self {
        Self {
            media_type,
            pending: AtomicU64::new(0),
            next_frame: AtomicU64::new(0),
            mixed,
        }
    }

    fn add_input(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }
}

impl Mixer for SyntheticMixer {
    fn output_type(&self) -> Option<MediaType> {
        Some(self.media_type)
    }

    fn process_output(&self, target: &mut VideoSample) -> std::result::Result<(), MixerError> {
        if self
            .pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| pending.checked_sub(1))
            .is_err()
        {
            return Err(MixerError::NeedMoreInput);
        }

        let index = self.next_frame.fetch_add(1, Ordering::SeqCst);
        let duration = self
            .media_type
            .frame_duration()
            .unwrap_or(TICKS_PER_SECOND / 30);
        let shade = (index % 256) as u8;
        target.surface_mut().fill([shade, 255 - shade, 128]);
        target.set_timing(index as i64 * duration, duration);
        self.mixed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Pretend GPU device that can be told to disappear
#[derive(Debug)]
struct DemoHardware {
    id: DeviceId,
    mixed: Arc<AtomicU64>,
    fail_after: Option<u64>,
}

impl RenderDevice for DemoHardware {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Hardware
    }

    fn create_surface(&self, media_type: &MediaType) -> std::result::Result<VideoSurface, DeviceError> {
        self.check_status()?;
        Ok(VideoSurface::new(media_type, self.id))
    }

    fn check_status(&self) -> std::result::Result<(), DeviceError> {
        match self.fail_after {
            Some(limit) if self.mixed.load(Ordering::SeqCst) >= limit => Err(DeviceError::DeviceRemoved),
            _ => Ok(()),
        }
    }
}

struct DemoDeviceFactory {
    mixed: Arc<AtomicU64>,
    fail_after: Option<u64>,
}

impl DeviceFactory for DemoDeviceFactory {
    fn create_hardware(&self) -> std::result::Result<Arc<dyn RenderDevice>, DeviceError> {
        Ok(Arc::new(DemoHardware {
            id: DeviceId::next(),
            mixed: Arc::clone(&self.mixed),
            fail_after: self.fail_after,
        }))
    }
}
