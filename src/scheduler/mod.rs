//! Sample scheduler
//!
//! Sits on top of the [`SampleQueue`] and owns the presentation modes the
//! queue knows nothing about: scrubbing, fake pause, the stop-to-pause
//! freeze and end-of-stream tracking. It translates clock readings into
//! queue times (clockless readings make every sample displayable) and
//! computes when the presenter should next wake the mixer.

use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::ClockTime;
use crate::decoder::MediaType;
use crate::queue::{
    CompositionAcquire, MixerSample, ProducerAcquire, ProducerRelease, QueueStats, SampleQueue,
};
use crate::renderer::{RenderDevice, VideoSurface};
use crate::utils::{duration_to_ticks, format_ticks, Result};

/// When the mixer should be woken next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeTime {
    /// Work is due now
    Immediate,

    /// At this presentation time
    At(i64),

    /// Only on an external trigger
    Never,
}

#[derive(Debug, Default, Clone, Copy)]
struct Modes {
    paused: bool,
    scrubbing: bool,
    fake_pause: bool,
    stop_to_pause_freeze: bool,
    frozen: bool,
    end_of_stream: bool,
    media_finished_raised: bool,
}

/// Orchestration layer over the sample queue
#[derive(Debug)]
pub struct SampleScheduler {
    queue: SampleQueue,
    modes: Mutex<Modes>,
    late_tolerance: i64,
    late_samples: AtomicU64,
}

impl SampleScheduler {
    /// Create a scheduler with an empty queue
    ///
    /// # Arguments
    ///
    /// * `late_tolerance` - How far behind the clock a fresh sample may be
    ///   before it is counted as late
    pub fn new(late_tolerance: Duration) -> Self {
        Self {
            queue: SampleQueue::new(),
            modes: Mutex::new(Modes::default()),
            late_tolerance: duration_to_ticks(late_tolerance),
            late_samples: AtomicU64::new(0),
        }
    }

    /// Underlying queue
    pub fn queue(&self) -> &SampleQueue {
        &self.queue
    }

    /// Get an empty buffer for the mixer
    pub fn get_mix_sample(&self, clock_time: ClockTime) -> Result<ProducerAcquire> {
        self.queue.acquire_for_producer(clock_time.schedule_time())
    }

    /// Hand a filled buffer back
    pub fn return_mix_sample(&self, clock_time: ClockTime, sample: MixerSample) -> ProducerRelease {
        let time = sample.sample().time;
        let outcome = self.queue.release_from_producer(clock_time.schedule_time(), sample);

        if clock_time.is_valid()
            && matches!(outcome, ProducerRelease::Queued { due: true })
            && time.saturating_add(self.late_tolerance) < clock_time.time
        {
            trace!(
                "Late sample {} at clock {}",
                format_ticks(time),
                format_ticks(clock_time.time)
            );
            self.late_samples.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Give back a buffer the mixer could not fill
    pub fn abandon_mix_sample(&self, sample: MixerSample) {
        self.queue.abandon_producer(sample);
    }

    /// Pick the frame to compose
    ///
    /// While frozen the held frame is never re-chosen.
    pub fn get_composition_sample(&self, rechoose: bool, clock_time: ClockTime) -> CompositionAcquire {
        let frozen = self.modes.lock().frozen;
        self.queue
            .acquire_for_consumer(rechoose && !frozen, clock_time.schedule_time())
    }

    /// Pixels of the held composition slot
    pub fn composition_surface(&self, slot: usize) -> Option<Arc<VideoSurface>> {
        self.queue.composition_surface(slot)
    }

    /// Release the composition frame
    ///
    /// # Returns
    ///
    /// Returns true if the mixer should be woken
    pub fn return_composition_sample(&self) -> bool {
        self.queue.release_from_consumer()
    }

    /// Drop queued frames and reset end of stream
    pub fn flush(&self, clock_time: ClockTime) -> Option<usize> {
        {
            let mut modes = self.modes.lock();
            modes.end_of_stream = false;
            modes.media_finished_raised = false;
        }
        self.queue.flush(clock_time.schedule_time())
    }

    /// Pin the current frame; scrubbing allows a forward frame
    pub fn pause(&self, clock_time: ClockTime) -> Option<usize> {
        let allow_forward = {
            let mut modes = self.modes.lock();
            modes.paused = true;
            modes.scrubbing
        };
        self.queue.pause(clock_time.schedule_time(), allow_forward)
    }

    /// Leave pause unless another mode still pins the frame
    pub fn unpause(&self) {
        let still_pinned = {
            let mut modes = self.modes.lock();
            modes.paused = false;
            modes.fake_pause || modes.frozen
        };
        if !still_pinned {
            self.queue.unpause();
        }
    }

    /// Enter scrubbing
    pub fn begin_scrub(&self) {
        debug!("Scrubbing started");
        self.modes.lock().scrubbing = true;
    }

    /// Leave scrubbing
    pub fn end_scrub(&self) {
        debug!("Scrubbing ended");
        self.modes.lock().scrubbing = false;
    }

    /// Scrub to `clock_time`, pinning the frame at or nearest after it
    pub fn scrub_to(&self, clock_time: ClockTime) -> Option<usize> {
        self.queue.pause(clock_time.schedule_time(), true)
    }

    /// Pin frames while the clock keeps running
    pub fn set_fake_pause(&self, enabled: bool, clock_time: ClockTime) {
        let unpin = {
            let mut modes = self.modes.lock();
            modes.fake_pause = enabled;
            !enabled && !modes.paused && !modes.frozen
        };
        if enabled {
            self.queue.pause(clock_time.schedule_time(), true);
        } else if unpin {
            self.queue.unpause();
        }
    }

    /// Choose whether a stop freezes the last frame instead of flushing
    pub fn set_stop_to_pause_freeze(&self, enabled: bool) {
        self.modes.lock().stop_to_pause_freeze = enabled;
    }

    /// Whether stops freeze the last frame
    pub fn stop_to_pause_freeze(&self) -> bool {
        self.modes.lock().stop_to_pause_freeze
    }

    /// Pin the frame showing at `clock_time` across a stop
    pub fn freeze_for_stop(&self, clock_time: ClockTime) -> Option<usize> {
        self.modes.lock().frozen = true;
        let pinned = self.queue.pin_displayed(clock_time.schedule_time());
        debug!("Frozen on slot {:?} for stop", pinned);
        pinned
    }

    /// Release a stop freeze
    pub fn unfreeze(&self) {
        let unpin = {
            let mut modes = self.modes.lock();
            let was_frozen = std::mem::replace(&mut modes.frozen, false);
            was_frozen && !modes.paused && !modes.fake_pause
        };
        if unpin {
            self.queue.unpause();
        }
    }

    /// Whether a stop freeze is active
    pub fn is_frozen(&self) -> bool {
        self.modes.lock().frozen
    }

    /// Whether scrubbing
    pub fn is_scrubbing(&self) -> bool {
        self.modes.lock().scrubbing
    }

    /// When the mixer should next run
    pub fn next_wake(&self, clock_time: ClockTime) -> WakeTime {
        let modes = *self.modes.lock();
        if !clock_time.is_valid() || modes.paused || modes.frozen || modes.fake_pause {
            return WakeTime::Never;
        }

        let now = clock_time.time;
        let (next, last) = self.queue.next_and_last_sample_time(now);
        let finish_pending = modes.end_of_stream && !modes.media_finished_raised;

        match next {
            Some(time) => WakeTime::At(time),
            None if finish_pending && last.map_or(true, |last| last <= now) => WakeTime::Immediate,
            None => WakeTime::Never,
        }
    }

    /// Mark or clear end of stream
    pub fn set_end_of_stream(&self, end_of_stream: bool) {
        let mut modes = self.modes.lock();
        modes.end_of_stream = end_of_stream;
        if !end_of_stream {
            modes.media_finished_raised = false;
        }
    }

    /// Whether end of stream was signalled
    pub fn is_end_of_stream(&self) -> bool {
        self.modes.lock().end_of_stream
    }

    /// Whether media finished should be raised now
    ///
    /// True exactly once per end of stream, after the clock reaches the
    /// last queued sample.
    pub fn check_media_finished(&self, clock_time: ClockTime) -> bool {
        {
            let modes = self.modes.lock();
            if !modes.end_of_stream || modes.media_finished_raised {
                return false;
            }
        }

        if clock_time.is_valid() {
            let view = self.queue.snapshot();
            if view.mixer_sample.is_some() {
                return false;
            }
            if let Some(last) = view.largest_time() {
                if last > clock_time.time {
                    return false;
                }
            }
        }

        let mut modes = self.modes.lock();
        if !modes.end_of_stream || modes.media_finished_raised {
            return false;
        }
        modes.media_finished_raised = true;
        true
    }

    /// Set the negotiated media type
    pub fn change_media_type(&self, media_type: Option<MediaType>) {
        self.queue.change_media_type(media_type);
    }

    /// Allocate future buffers on `device`
    pub fn invalidate_device(&self, device: Arc<dyn RenderDevice>) {
        self.queue.invalidate_device(device);
    }

    /// Samples that arrived later than the tolerance
    pub fn late_sample_count(&self) -> u64 {
        self.late_samples.load(Ordering::Relaxed)
    }

    /// Queue counters
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }
}
