//! Render device lifecycle and software fallback
//!
//! The device manager holds the presenter's current device behind a short
//! leaf lock. Hardware failures classified as fallback-eligible switch the
//! current device to a lazily created software device; the sample queue then
//! reallocates its buffers through its continuity epoch.

use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::renderer::{DeviceError, DeviceFactory, DeviceKind, ErrorClass, RenderDevice};
use crate::utils::error::{PresenterError, Result};

/// Result of handing a device error to the manager
#[derive(Debug, Clone)]
pub enum FallbackOutcome {
    /// Transient failure, retry on the next callback
    Retry,

    /// Moved to the software device
    SwitchedToSoftware(Arc<dyn RenderDevice>),

    /// Software rendering failed too, or fallback is disabled
    Exhausted(DeviceError),

    /// Not recoverable by switching devices
    Fatal(DeviceError),
}

/// Owner of the presenter's render device
pub struct DeviceManager {
    /// Creates hardware and software devices
    factory: Arc<dyn DeviceFactory>,

    /// Device new buffers are allocated on
    current: RwLock<Arc<dyn RenderDevice>>,

    /// Software device, created on first fallback
    software: OnceCell<Arc<dyn RenderDevice>>,

    /// Whether fallback to software is allowed
    fallback_enabled: bool,

    /// Number of successful fallbacks
    fallbacks: AtomicU64,

    /// Number of compositor-driven migrations
    migrations: AtomicU64,
}

impl DeviceManager {
    /// Create a device manager, preferring hardware
    ///
    /// If no hardware device can be created and fallback is enabled, the
    /// manager starts on the software device.
    pub fn new(factory: Arc<dyn DeviceFactory>, fallback_enabled: bool) -> Result<Self> {
        let software = OnceCell::new();

        let current = match factory.create_hardware() {
            Ok(device) => {
                info!("Using hardware render device {}", device.id());
                device
            }
            Err(err) if fallback_enabled && err.classify() == ErrorClass::SoftwareFallback => {
                info!("Hardware device unavailable ({}), starting in software", err);
                let device = factory.create_software().map_err(|e| {
                    PresenterError::FallbackExhausted(format!("software device creation failed: {}", e))
                })?;
                let _ = software.set(Arc::clone(&device));
                device
            }
            Err(err) => return Err(PresenterError::Device(err)),
        };

        Ok(Self {
            factory,
            current: RwLock::new(current),
            software,
            fallback_enabled,
            fallbacks: AtomicU64::new(0),
            migrations: AtomicU64::new(0),
        })
    }

    /// Device new buffers should be allocated on
    pub fn current(&self) -> Arc<dyn RenderDevice> {
        Arc::clone(&self.current.read())
    }

    /// Whether rendering currently happens in software
    pub fn is_software(&self) -> bool {
        self.current.read().kind() == DeviceKind::Software
    }

    /// Lazily create (once) and return the software device
    pub fn software_device(&self) -> std::result::Result<Arc<dyn RenderDevice>, DeviceError> {
        self.software
            .get_or_try_init(|| self.factory.create_software())
            .map(Arc::clone)
    }

    /// Decide how to recover from a device error
    pub fn handle_error(&self, err: &DeviceError) -> FallbackOutcome {
        match err.classify() {
            ErrorClass::Transient => {
                debug!("Transient device error: {}", err);
                FallbackOutcome::Retry
            }
            ErrorClass::Fatal => FallbackOutcome::Fatal(err.clone()),
            ErrorClass::SoftwareFallback => {
                if !self.fallback_enabled {
                    warn!("Device failed ({}) and software fallback is disabled", err);
                    return FallbackOutcome::Exhausted(err.clone());
                }

                if self.is_software() {
                    warn!("Software device failed: {}", err);
                    return FallbackOutcome::Exhausted(err.clone());
                }

                match self.software_device() {
                    Ok(device) => {
                        warn!("Hardware device failed ({}), switching to software {}", err, device.id());
                        *self.current.write() = Arc::clone(&device);
                        self.fallbacks.fetch_add(1, Ordering::Relaxed);
                        FallbackOutcome::SwitchedToSoftware(device)
                    }
                    Err(create_err) => {
                        warn!("Software device creation failed: {}", create_err);
                        FallbackOutcome::Exhausted(create_err)
                    }
                }
            }
        }
    }

    /// Make `device` the current device
    ///
    /// # Returns
    ///
    /// Returns false if it already was current
    pub fn migrate_to(&self, device: Arc<dyn RenderDevice>) -> bool {
        let mut current = self.current.write();
        if current.id() == device.id() {
            return false;
        }

        info!("Migrating presenter from {} to {}", current.id(), device.id());
        *current = device;
        self.migrations.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Successful software fallbacks so far
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Device migrations so far
    pub fn migration_count(&self) -> u64 {
        self.migrations.load(Ordering::Relaxed)
    }
}
