//! Queue sample buffers

use std::sync::Arc;

use crate::queue::SAMPLE_TIME_INVALID;
use crate::renderer::VideoSurface;

/// One frame buffer plus its timing
///
/// The surface is reference counted so the compositor can keep a frame on
/// screen while the slot is recycled; writing through [`surface_mut`]
/// copies on write in that case.
///
/// [`surface_mut`]: VideoSample::surface_mut
#[derive(Debug, Clone)]
pub struct VideoSample {
    surface: Arc<VideoSurface>,

    /// Presentation time in 100 ns ticks
    pub time: i64,

    /// Duration in 100 ns ticks
    pub duration: i64,

    /// Queue epoch the buffer was allocated in
    epoch: u32,
}

impl VideoSample {
    /// Wrap a freshly allocated surface
    pub fn new(surface: VideoSurface, epoch: u32) -> Self {
        Self {
            surface: Arc::new(surface),
            time: SAMPLE_TIME_INVALID,
            duration: 0,
            epoch,
        }
    }

    /// Shared handle to the pixels
    pub fn surface(&self) -> &Arc<VideoSurface> {
        &self.surface
    }

    /// Writable access to the pixels
    pub fn surface_mut(&mut self) -> &mut VideoSurface {
        Arc::make_mut(&mut self.surface)
    }

    /// Set presentation time and duration
    pub fn set_timing(&mut self, time: i64, duration: i64) {
        self.time = time;
        self.duration = duration;
    }

    /// Epoch the buffer belongs to
    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

/// A slot checked out by the mixer
///
/// Must go back through [`SampleQueue::release_from_producer`] or
/// [`SampleQueue::abandon_producer`]; the slot stays held until then.
///
/// [`SampleQueue::release_from_producer`]: crate::queue::SampleQueue::release_from_producer
/// [`SampleQueue::abandon_producer`]: crate::queue::SampleQueue::abandon_producer
#[derive(Debug)]
pub struct MixerSample {
    pub(crate) slot: usize,
    pub(crate) sample: VideoSample,
    pub(crate) reallocated: bool,
}

impl MixerSample {
    /// Slot index
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The buffer
    pub fn sample(&self) -> &VideoSample {
        &self.sample
    }

    /// The buffer, for filling
    pub fn sample_mut(&mut self) -> &mut VideoSample {
        &mut self.sample
    }

    /// Whether the buffer was allocated for this acquire
    pub fn was_reallocated(&self) -> bool {
        self.reallocated
    }
}
