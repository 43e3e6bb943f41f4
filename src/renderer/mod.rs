//! Renderer module for the presenter
//!
//! This module owns the render-device abstraction the sample queue allocates
//! frame buffers on: hardware devices are injected by the host through a
//! [`DeviceFactory`], while a system-memory [`SoftwareDevice`] is always
//! available as the fallback target.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::decoder::MediaType;

pub mod fallback;
pub mod software;
pub mod surface;

// Re-export main types
pub use fallback::{DeviceManager, FallbackOutcome};
pub use software::{SoftwareDevice, SoftwareDeviceFactory};
pub use surface::VideoSurface;

static NEXT_DEVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a render device for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Allocate a fresh, never reused device id
    pub fn next() -> Self {
        DeviceId(NEXT_DEVICE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// What kind of memory a device renders from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// GPU-resident surfaces
    Hardware,

    /// System-memory surfaces
    Software,
}

/// Errors reported by render devices
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device was lost and must be recreated
    #[error("device lost")]
    DeviceLost,

    /// The adapter was removed (driver update, hot unplug)
    #[error("device removed")]
    DeviceRemoved,

    /// Out of video memory
    #[error("out of video memory")]
    OutOfVideoMemory,

    /// Driver reported an internal failure
    #[error("driver internal error")]
    DriverInternal,

    /// No hardware device could be created on this system
    #[error("hardware device not available")]
    NotAvailable,

    /// The device is temporarily busy; retry later
    #[error("device busy")]
    Busy,

    /// The call was malformed; no device switch will fix it
    #[error("invalid device call: {0}")]
    InvalidCall(String),

    /// Any other native error code
    #[error("unrecognized device error code {0}")]
    Unknown(i32),
}

/// How a device error is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Try again on the next callback
    Transient,

    /// Switch to the software device
    SoftwareFallback,

    /// Nothing to recover
    Fatal,
}

impl DeviceError {
    /// Classify the error; unrecognized codes are treated as hardware failure
    pub fn classify(&self) -> ErrorClass {
        match self {
            DeviceError::Busy => ErrorClass::Transient,
            DeviceError::InvalidCall(_) => ErrorClass::Fatal,
            DeviceError::DeviceLost
            | DeviceError::DeviceRemoved
            | DeviceError::OutOfVideoMemory
            | DeviceError::DriverInternal
            | DeviceError::NotAvailable
            | DeviceError::Unknown(_) => ErrorClass::SoftwareFallback,
        }
    }
}

/// Render device trait defining where frame buffers live
pub trait RenderDevice: Send + Sync + fmt::Debug {
    /// Device identity
    fn id(&self) -> DeviceId;

    /// Hardware or software
    fn kind(&self) -> DeviceKind;

    /// Allocate a frame buffer for the given media type
    ///
    /// # Arguments
    ///
    /// * `media_type` - Negotiated output format
    ///
    /// # Returns
    ///
    /// Returns a black surface owned by this device or a device error
    fn create_surface(&self, media_type: &MediaType) -> std::result::Result<VideoSurface, DeviceError>;

    /// Make a copy of a surface resident on this device
    ///
    /// The default implementation copies the pixels through system memory.
    fn convert_surface(&self, source: &VideoSurface) -> std::result::Result<VideoSurface, DeviceError> {
        let mut copy = source.clone();
        copy.device = self.id();
        Ok(copy)
    }

    /// Report whether the device is still usable
    fn check_status(&self) -> std::result::Result<(), DeviceError> {
        Ok(())
    }
}

/// Factory the presenter uses to (re)create devices
pub trait DeviceFactory: Send + Sync {
    /// Create the preferred hardware device
    fn create_hardware(&self) -> std::result::Result<Arc<dyn RenderDevice>, DeviceError>;

    /// Create the software fallback device
    fn create_software(&self) -> std::result::Result<Arc<dyn RenderDevice>, DeviceError> {
        Ok(Arc::new(SoftwareDevice::new()))
    }
}
