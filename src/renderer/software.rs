//! System-memory render device

use std::sync::Arc;

use crate::decoder::MediaType;
use crate::renderer::{DeviceError, DeviceFactory, DeviceId, DeviceKind, RenderDevice, VideoSurface};

/// Render device backed by plain system memory
#[derive(Debug)]
pub struct SoftwareDevice {
    id: DeviceId,
}

impl SoftwareDevice {
    /// Create a new software device
    pub fn new() -> Self {
        Self { id: DeviceId::next() }
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for SoftwareDevice {
    fn id(&self) -> DeviceId {
        self.id
    }

    fn kind(&self) -> DeviceKind {
        DeviceKind::Software
    }

    fn create_surface(&self, media_type: &MediaType) -> Result<VideoSurface, DeviceError> {
        Ok(VideoSurface::new(media_type, self.id))
    }
}

/// Factory for hosts without any hardware device
///
/// `create_hardware` always fails with [`DeviceError::NotAvailable`], so the
/// device manager starts directly on the software device.
#[derive(Debug, Default)]
pub struct SoftwareDeviceFactory;

impl DeviceFactory for SoftwareDeviceFactory {
    fn create_hardware(&self) -> Result<Arc<dyn RenderDevice>, DeviceError> {
        Err(DeviceError::NotAvailable)
    }
}
