//! Video sample scheduling and presentation
//!
//! Bridges an upstream media mixer to a UI compositor. The mixer thread
//! fills a small pool of frame buffers through [`EvrPresenter`]; the
//! compositor thread picks the frame due for each pass through
//! [`AVSurfaceRenderer`]. The two sides meet only in the lock-free
//! [`SampleQueue`].

pub mod clock;
pub mod decoder;
pub mod events;
pub mod presenter;
pub mod queue;
pub mod renderer;
pub mod scheduler;
pub mod utils;

pub use clock::{ClockTime, ClockWrapper, PresentationClock, SystemClock, ThreadTimer, TimerService};
pub use decoder::{MediaType, Mixer, MixerError, PixelFormat};
pub use events::{PresenterEvent, PresenterEventSink, TaskQueue};
pub use presenter::{
    AVSurfaceRenderer, ClockSink, CompositionResource, CompositionStatus, DisplayControl,
    EvrPresenter, PresenterMessage, PresenterService, PresenterState, PresenterStats,
    RateControl, ServiceKind, ServiceProvider,
};
pub use queue::{SampleQueue, VideoSample};
pub use renderer::{
    DeviceError, DeviceFactory, DeviceId, DeviceKind, RenderDevice, SoftwareDevice,
    SoftwareDeviceFactory, VideoSurface,
};
pub use scheduler::{SampleScheduler, WakeTime};
pub use utils::{Config, PresenterError, Result};
