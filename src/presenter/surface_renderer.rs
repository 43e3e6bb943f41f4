//! Compositor-side entry points
//!
//! One composition pass is `begin_composition` for every compositor
//! resource taking part, any number of `begin_render`/`end_render` pairs,
//! then `end_composition` for each resource. The first resource to begin a
//! pass picks the frame; the last one to end it returns the frame to the
//! queue and tracks which device the compositor rendered with.

use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::decoder::PixelFormat;
use crate::presenter::{PresenterCore, RenderCounters};
use crate::queue::CompositionAcquire;
use crate::renderer::{DeviceError, DeviceId, RenderDevice, VideoSurface};
use crate::utils::error::{PresenterError, Result};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A compositor object taking part in composition passes
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct CompositionResource {
    id: u64,
}

impl CompositionResource {
    /// Create a resource with a fresh identity
    pub fn new() -> Self {
        Self {
            id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Resource identity
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for CompositionResource {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of beginning a composition pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionStatus {
    /// A frame not shown before is ready
    pub new_frame: bool,

    /// Rendering moved to software since the last pass, because of this error
    pub software_fallback: Option<DeviceError>,
}

#[derive(Debug, Default)]
struct Pass {
    resources: Vec<u64>,
    slot: Option<usize>,
    surface: Option<Arc<VideoSurface>>,
    new_frame: bool,
    rendering: bool,

    /// Copies of `surface` made for other devices during this pass
    converted: HashMap<DeviceId, Arc<VideoSurface>>,
    rendered_device: Option<Arc<dyn RenderDevice>>,
}

#[derive(Debug, Default)]
struct MigrationTracker {
    candidate: Option<DeviceId>,
    passes: u32,
}

/// Hands queued frames to the compositor
pub struct AVSurfaceRenderer {
    core: Arc<PresenterCore>,
    pass: Mutex<Pass>,
    migration: Mutex<MigrationTracker>,
    last_presented: Mutex<Option<Arc<VideoSurface>>>,
}

impl AVSurfaceRenderer {
    pub(crate) fn new(core: Arc<PresenterCore>) -> Self {
        Self {
            core,
            pass: Mutex::new(Pass::default()),
            migration: Mutex::new(MigrationTracker::default()),
            last_presented: Mutex::new(None),
        }
    }

    /// Register `resource` for the current pass
    ///
    /// The first resource of a pass chooses the frame to show.
    ///
    /// # Returns
    ///
    /// Returns whether a new frame is ready and any software fallback since
    /// the last pass, or `FallbackExhausted` once no device is usable
    pub fn begin_composition(&self, resource: &CompositionResource) -> Result<CompositionStatus> {
        let first = {
            let mut pass = self.pass.lock();
            if pass.resources.contains(&resource.id()) {
                return Err(PresenterError::InvalidState(format!(
                    "resource {} already in composition",
                    resource.id()
                )));
            }
            pass.resources.is_empty()
        };

        let software_fallback = self.core.take_switched_fallback()?;
        if let Some(err) = &software_fallback {
            debug!("Reporting software fallback to compositor: {}", err);
        }

        if !first {
            let mut pass = self.pass.lock();
            pass.resources.push(resource.id());
            return Ok(CompositionStatus {
                new_frame: pass.new_frame,
                software_fallback,
            });
        }

        let now = self.core.clock.get_time();
        let acquired = self.core.scheduler.get_composition_sample(true, now);
        let counters = &self.core.counters;
        match acquired {
            CompositionAcquire::New(_) => RenderCounters::bump(&counters.frames_presented),
            CompositionAcquire::Same(_) => RenderCounters::bump(&counters.frames_repeated),
            CompositionAcquire::None => {}
        }

        let slot = acquired.slot();
        let surface = slot.and_then(|slot| self.core.scheduler.composition_surface(slot));
        trace!("Composition pass on slot {:?} (new: {})", slot, acquired.is_new());

        let mut pass = self.pass.lock();
        pass.resources.push(resource.id());
        pass.slot = slot;
        pass.surface = surface;
        pass.new_frame = acquired.is_new();
        pass.converted.clear();
        Ok(CompositionStatus {
            new_frame: pass.new_frame,
            software_fallback,
        })
    }

    /// Frame to draw with `target`
    ///
    /// Frames on another device are converted once per pass and device.
    /// Without a frame a black placeholder is returned.
    pub fn begin_render(&self, target: &Arc<dyn RenderDevice>) -> Result<Arc<VideoSurface>> {
        let mut pass = self.pass.lock();
        if pass.resources.is_empty() {
            return Err(PresenterError::InvalidState(
                "begin_render outside a composition pass".to_string(),
            ));
        }
        pass.rendering = true;
        pass.rendered_device = Some(Arc::clone(target));

        let Some(surface) = pass.surface.clone() else {
            drop(pass);
            return Ok(self.placeholder(target.id()));
        };
        *self.last_presented.lock() = Some(Arc::clone(&surface));

        let id = target.id();
        if surface.device == id {
            return Ok(surface);
        }
        if let Some(converted) = pass.converted.get(&id) {
            return Ok(Arc::clone(converted));
        }

        trace!("Converting frame from {} to {}", surface.device, id);
        let converted = Arc::new(target.convert_surface(&surface)?);
        pass.converted.insert(id, Arc::clone(&converted));
        Ok(converted)
    }

    /// Finish drawing the frame from `begin_render`
    pub fn end_render(&self) -> Result<()> {
        let mut pass = self.pass.lock();
        if !pass.rendering {
            return Err(PresenterError::InvalidState(
                "end_render without begin_render".to_string(),
            ));
        }
        pass.rendering = false;
        Ok(())
    }

    /// Unregister `resource`; the last one returns the frame to the queue
    pub fn end_composition(&self, resource: &CompositionResource) -> Result<()> {
        let finished = {
            let mut pass = self.pass.lock();
            let Some(position) = pass.resources.iter().position(|&id| id == resource.id()) else {
                return Err(PresenterError::InvalidState(format!(
                    "resource {} not in composition",
                    resource.id()
                )));
            };
            pass.resources.remove(position);

            if pass.resources.is_empty() {
                let held = pass.slot.take();
                let rendered = pass.rendered_device.take();
                pass.surface = None;
                pass.new_frame = false;
                pass.rendering = false;
                pass.converted.clear();
                Some((held, rendered))
            } else {
                None
            }
        };

        let Some((held, rendered)) = finished else {
            return Ok(());
        };

        if held.is_some() && self.core.scheduler.return_composition_sample() {
            trace!("Released slot {:?}, waking mixer", held);
            self.core.wake_mixer();
        }
        if let Some(device) = rendered {
            self.track_migration(device);
        }
        Ok(())
    }

    /// Copy of the frame last handed out
    pub fn last_presented(&self) -> Option<VideoSurface> {
        self.last_presented
            .lock()
            .as_ref()
            .map(|surface| VideoSurface::clone(surface))
    }

    fn placeholder(&self, device: DeviceId) -> Arc<VideoSurface> {
        RenderCounters::bump(&self.core.counters.placeholders);
        let surface = match self.core.scheduler.queue().media_type() {
            Some(media_type) => VideoSurface::new(&media_type, device),
            None => VideoSurface::black(
                self.core.config.placeholder_width,
                self.core.config.placeholder_height,
                PixelFormat::Argb32,
                device,
            ),
        };
        Arc::new(surface)
    }

    /// Migrate once the compositor keeps rendering with another device
    fn track_migration(&self, device: Arc<dyn RenderDevice>) {
        let current = self.core.devices.current().id();
        let id = device.id();

        let migrate = {
            let mut tracker = self.migration.lock();
            if id == current {
                *tracker = MigrationTracker::default();
                return;
            }
            if tracker.candidate == Some(id) {
                tracker.passes += 1;
            } else {
                tracker.candidate = Some(id);
                tracker.passes = 1;
            }

            let ready = tracker.passes >= self.core.config.device_migration_passes;
            if ready {
                *tracker = MigrationTracker::default();
            }
            ready
        };

        if migrate && self.core.devices.migrate_to(Arc::clone(&device)) {
            self.core.switch_device(device);
        }
    }
}

impl std::fmt::Debug for AVSurfaceRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pass = self.pass.lock();
        f.debug_struct("AVSurfaceRenderer")
            .field("resources", &pass.resources.len())
            .field("slot", &pass.slot)
            .finish()
    }
}
