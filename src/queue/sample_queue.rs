//! Lock-free two-role sample queue
//!
//! Every change to the bookkeeping follows the same cycle:
//!
//! 1. claim a scratch view (one that is neither current nor held by the other
//!    role) by CAS on the arbitration word
//! 2. copy the current view into a local snapshot and validate the copy
//! 3. apply the operation to the snapshot and write it into the scratch view
//! 4. publish by CAS: scratch becomes current, the claim is dropped and the
//!    continuity counter advances
//!
//! If the publish CAS fails only because the other role claimed or dropped a
//! view, the publish is retried as is. If the other role published in the
//! meantime, the snapshot is stale and the whole cycle repeats from step 2.
//! Callers of the same role are serialized by the claim step.

use crossbeam::utils::Backoff;
use log::{debug, trace};
use parking_lot::Mutex;
use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::decoder::MediaType;
use crate::queue::logical::StateViewLogicalSample;
use crate::queue::state_view::{MixerChoice, PauseSample, StateView, ViewData};
use crate::queue::{
    CompositionAcquire, MixerSample, ProducerAcquire, ProducerRelease, QueueStats, Role,
    VideoSample, SAMPLE_COUNT, SAMPLE_TIME_INVALID, SAMPLE_TIME_RESERVED, VIEW_COUNT,
};
use crate::renderer::{RenderDevice, VideoSurface};
use crate::utils::error::{PresenterError, Result};

/// Upper bound on reseed cycles for one operation; exceeding it means the
/// protocol is broken
const MAX_VIEW_RETRIES: usize = 1 << 20;

/// What new buffers are allocated for
#[derive(Debug, Default)]
struct SampleTarget {
    epoch: u32,
    media_type: Option<MediaType>,
    device: Option<Arc<dyn RenderDevice>>,
}

#[derive(Debug, Default)]
struct StatsCounters {
    frames_queued: AtomicU64,
    frames_discarded: AtomicU64,
    frames_overwritten: AtomicU64,
    producer_full: AtomicU64,
    producer_waits: AtomicU64,
    reallocations: AtomicU64,
    composition_new: AtomicU64,
    composition_same: AtomicU64,
    composition_empty: AtomicU64,
    flushes: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Three-slot frame queue shared by the mixer and the compositor
#[derive(Debug)]
pub struct SampleQueue {
    /// Packed [`StateViewLogicalSample`]
    logical: AtomicU32,

    /// Physical state views
    views: [StateView; VIEW_COUNT],

    /// Slot buffers; a slot's buffer is only touched by the role holding it
    slots: [Mutex<Option<VideoSample>>; SAMPLE_COUNT],

    /// Allocation target, bumped on type or device change
    target: Mutex<SampleTarget>,

    stats: StatsCounters,
}

impl SampleQueue {
    /// Create an empty queue with no media type and no device
    pub fn new() -> Self {
        Self {
            logical: AtomicU32::new(StateViewLogicalSample::initial().encode()),
            views: std::array::from_fn(|_| StateView::new()),
            slots: std::array::from_fn(|_| Mutex::new(None)),
            target: Mutex::new(SampleTarget::default()),
            stats: StatsCounters::default(),
        }
    }

    /// Set the device new buffers are allocated on
    ///
    /// Existing buffers become stale and are reallocated on their next
    /// producer acquire.
    pub fn invalidate_device(&self, device: Arc<dyn RenderDevice>) {
        let mut target = self.target.lock();
        debug!("Sample queue device set to {}", device.id());
        target.device = Some(device);
        target.epoch = target.epoch.wrapping_add(1);
    }

    /// Change (or clear) the negotiated media type
    pub fn change_media_type(&self, media_type: Option<MediaType>) {
        let mut target = self.target.lock();
        debug!("Sample queue media type changed to {:?}", media_type);
        target.media_type = media_type;
        target.epoch = target.epoch.wrapping_add(1);
    }

    /// Mark every buffer stale without changing type or device
    pub fn invalidate_device_resources(&self) {
        let mut target = self.target.lock();
        target.epoch = target.epoch.wrapping_add(1);
    }

    /// Negotiated media type
    pub fn media_type(&self) -> Option<MediaType> {
        self.target.lock().media_type
    }

    /// Current allocation epoch
    pub fn continuity_epoch(&self) -> u32 {
        self.target.lock().epoch
    }

    /// Consistent snapshot of the current state view
    pub fn snapshot(&self) -> ViewData {
        let backoff = Backoff::new();
        loop {
            let word = StateViewLogicalSample::decode(self.logical.load(Ordering::Acquire));
            let data = self.views[word.current_view as usize].load();
            fence(Ordering::Acquire);
            let check = StateViewLogicalSample::decode(self.logical.load(Ordering::Relaxed));
            if check.continuity == word.continuity {
                return data;
            }
            backoff.spin();
        }
    }

    /// Check out a buffer for the mixer to fill
    ///
    /// # Arguments
    ///
    /// * `current_time` - Presentation time; `i64::MAX` in clockless mode
    pub fn acquire_for_producer(&self, current_time: i64) -> Result<ProducerAcquire> {
        let (epoch, media_type, device) = {
            let target = self.target.lock();
            let media_type = target.media_type.ok_or(PresenterError::MediaTypeNotSet)?;
            let device = target
                .device
                .clone()
                .ok_or_else(|| PresenterError::InvalidState("no render device".to_string()))?;
            (target.epoch, media_type, device)
        };

        let (choice, overwritten) = self.update(Role::Mixer, |view| {
            let choice = view.choose_mixer(current_time);
            let mut overwritten = false;
            match choice {
                MixerChoice::Slot(slot) => {
                    overwritten = view.sample_times[slot] != SAMPLE_TIME_INVALID;
                    view.sample_times[slot] = SAMPLE_TIME_INVALID;
                    view.mixer_sample = Some(slot);
                    view.mixer_flushed = false;
                    view.mixer_waiting_on = None;
                }
                MixerChoice::Blocked(held) => view.mixer_waiting_on = Some(held),
                MixerChoice::Full => {}
            }
            (choice, overwritten)
        });

        let slot = match choice {
            MixerChoice::Slot(slot) => slot,
            MixerChoice::Full => {
                bump(&self.stats.producer_full);
                return Ok(ProducerAcquire::Full);
            }
            MixerChoice::Blocked(held) => {
                trace!("Mixer waiting on composition slot {}", held);
                bump(&self.stats.producer_waits);
                return Ok(ProducerAcquire::WaitingForComposition);
            }
        };
        if overwritten {
            bump(&self.stats.frames_overwritten);
        }

        let existing = self.slots[slot].lock().take();
        let (sample, reallocated) = match existing {
            Some(sample)
                if sample.epoch() == epoch
                    && sample.surface().matches(&media_type)
                    && sample.surface().device == device.id() =>
            {
                (sample, false)
            }
            _ => match device.create_surface(&media_type) {
                Ok(surface) => {
                    bump(&self.stats.reallocations);
                    (VideoSample::new(surface, epoch), true)
                }
                Err(err) => {
                    debug!("Slot {} allocation failed: {}", slot, err);
                    self.update(Role::Mixer, |view| view.mixer_sample = None);
                    return Err(PresenterError::Device(err));
                }
            },
        };

        Ok(ProducerAcquire::Acquired(MixerSample {
            slot,
            sample,
            reallocated,
        }))
    }

    /// Return a filled buffer to the queue
    ///
    /// # Panics
    ///
    /// Panics if `sample` is not the slot the mixer holds
    pub fn release_from_producer(&self, current_time: i64, sample: MixerSample) -> ProducerRelease {
        let MixerSample { slot, sample, .. } = sample;
        let time = sample.time;
        self.put_back(slot, sample);

        let outcome = self.update(Role::Mixer, |view| {
            if view.mixer_sample != Some(slot) {
                panic!(
                    "sample queue: mixer released slot {} while holding {:?}",
                    slot, view.mixer_sample
                );
            }
            view.mixer_sample = None;

            if view.mixer_flushed {
                view.mixer_flushed = false;
                view.sample_times[slot] = SAMPLE_TIME_INVALID;
                return ProducerRelease::Discarded;
            }

            if time >= 0 {
                view.sample_times[slot] = time;
                ProducerRelease::Queued {
                    due: time <= current_time,
                }
            } else {
                view.sample_times[slot] = SAMPLE_TIME_INVALID;
                ProducerRelease::Discarded
            }
        });

        match outcome {
            ProducerRelease::Queued { .. } => bump(&self.stats.frames_queued),
            ProducerRelease::Discarded => bump(&self.stats.frames_discarded),
        }
        outcome
    }

    /// Give back a buffer the mixer failed to fill
    pub fn abandon_producer(&self, sample: MixerSample) {
        let MixerSample { slot, sample, .. } = sample;
        self.put_back(slot, sample);

        self.update(Role::Mixer, |view| {
            if view.mixer_sample == Some(slot) {
                view.mixer_sample = None;
                view.mixer_flushed = false;
                view.sample_times[slot] = SAMPLE_TIME_INVALID;
            }
        });
    }

    /// Pick the slot the compositor should display
    ///
    /// # Arguments
    ///
    /// * `rechoose` - Scan again even if a slot is already held
    /// * `current_time` - Presentation time; `i64::MAX` in clockless mode
    pub fn acquire_for_consumer(&self, rechoose: bool, current_time: i64) -> CompositionAcquire {
        let outcome = self.update(Role::Composition, |view| {
            let held = view.composition_sample.filter(|&slot| {
                let time = view.sample_times[slot];
                time == SAMPLE_TIME_RESERVED || (time >= 0 && time <= current_time)
            });

            let chosen = match view.pause_sample {
                PauseSample::Slot(slot) => Some(slot),
                PauseSample::NoPauseSample => None,
                PauseSample::None if !rechoose && held.is_some() => held,
                PauseSample::None => view.choose_composition(current_time).or(held),
            };

            view.composition_sample = chosen;

            match chosen {
                Some(slot) => {
                    let fresh = view.last_composition_sample != Some(slot);
                    view.last_composition_sample = Some(slot);
                    if fresh {
                        CompositionAcquire::New(slot)
                    } else {
                        CompositionAcquire::Same(slot)
                    }
                }
                None => CompositionAcquire::None,
            }
        });

        match outcome {
            CompositionAcquire::New(_) => bump(&self.stats.composition_new),
            CompositionAcquire::Same(_) => bump(&self.stats.composition_same),
            CompositionAcquire::None => bump(&self.stats.composition_empty),
        }
        outcome
    }

    /// Pixels of a slot the compositor holds
    pub fn composition_surface(&self, slot: usize) -> Option<Arc<VideoSurface>> {
        debug_assert!(slot < SAMPLE_COUNT);
        self.slots[slot]
            .lock()
            .as_ref()
            .map(|sample| Arc::clone(sample.surface()))
    }

    /// Release the compositor's slot
    ///
    /// # Returns
    ///
    /// Returns true if the mixer was waiting on a slot the compositor has
    /// now left behind and should be woken
    pub fn release_from_consumer(&self) -> bool {
        self.update(Role::Composition, |view| {
            view.composition_sample = None;
            match view.mixer_waiting_on {
                Some(waited) if view.last_composition_sample != Some(waited) => {
                    view.mixer_waiting_on = None;
                    true
                }
                _ => false,
            }
        })
    }

    /// Drop queued frames, preserving the one on display
    ///
    /// The held slot (or a fresh scan's choice) becomes the single reserved
    /// slot; everything else turns invalid. A frame the mixer is writing
    /// right now is discarded when it comes back.
    ///
    /// # Returns
    ///
    /// Returns the preserved slot
    pub fn flush(&self, current_time: i64) -> Option<usize> {
        let preserved = self.update(Role::Mixer, |view| {
            let pause_slot = match view.pause_sample {
                PauseSample::Slot(slot) => Some(slot),
                _ => None,
            };
            let preserve = view
                .composition_sample
                .filter(|&slot| ViewData::is_displayable(view.sample_times[slot]))
                .or(pause_slot)
                .or_else(|| view.choose_composition(current_time));

            for slot in 0..SAMPLE_COUNT {
                if Some(slot) == view.mixer_sample {
                    continue;
                }
                view.sample_times[slot] = if Some(slot) == preserve {
                    SAMPLE_TIME_RESERVED
                } else {
                    SAMPLE_TIME_INVALID
                };
            }

            if view.mixer_sample.is_some() {
                view.mixer_flushed = true;
            }
            if view.last_composition_sample != preserve {
                view.last_composition_sample = None;
            }
            if pause_slot.is_some() {
                view.pause_sample = preserve.map_or(PauseSample::NoPauseSample, PauseSample::Slot);
            }
            preserve
        });

        bump(&self.stats.flushes);
        debug!("Sample queue flushed, preserved slot {:?}", preserved);
        preserved
    }

    /// Pin the compositor to one slot
    ///
    /// Uses the compositor's scan; with `allow_forward` a frame after
    /// `current_time` may be chosen when nothing earlier qualifies.
    ///
    /// # Returns
    ///
    /// Returns the pause slot, or None when paused on nothing
    pub fn pause(&self, current_time: i64, allow_forward: bool) -> Option<usize> {
        self.update(Role::Mixer, |view| {
            let choice = view.choose_composition(current_time).or_else(|| {
                if allow_forward {
                    view.earliest_after(current_time)
                } else {
                    None
                }
            });
            view.pause_sample = choice.map_or(PauseSample::NoPauseSample, PauseSample::Slot);
            choice
        })
    }

    /// Pin the compositor to the frame it is showing
    ///
    /// Prefers the held slot, then the last handed slot, then a scan at
    /// `current_time`.
    pub fn pin_displayed(&self, current_time: i64) -> Option<usize> {
        self.update(Role::Mixer, |view| {
            let displayable = |slot: &usize| ViewData::is_displayable(view.sample_times[*slot]);
            let choice = view
                .composition_sample
                .filter(displayable)
                .or(view.last_composition_sample.filter(displayable))
                .or_else(|| view.choose_composition(current_time));
            view.pause_sample = choice.map_or(PauseSample::NoPauseSample, PauseSample::Slot);
            choice
        })
    }

    /// Leave pause
    pub fn unpause(&self) {
        self.update(Role::Mixer, |view| view.pause_sample = PauseSample::None);
    }

    /// Whether the compositor is pinned
    pub fn is_paused(&self) -> bool {
        self.snapshot().pause_sample != PauseSample::None
    }

    /// Smallest valid timestamp in the queue
    pub fn smallest_sample_time(&self) -> Option<i64> {
        self.snapshot().smallest_time()
    }

    /// Next timestamp after `current_time` and the largest timestamp
    pub fn next_and_last_sample_time(&self, current_time: i64) -> (Option<i64>, Option<i64>) {
        let view = self.snapshot();
        let next = view
            .earliest_after(current_time)
            .map(|slot| view.sample_times[slot]);
        (next, view.largest_time())
    }

    /// Queue counters
    pub fn stats(&self) -> QueueStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        QueueStats {
            frames_queued: load(&self.stats.frames_queued),
            frames_discarded: load(&self.stats.frames_discarded),
            frames_overwritten: load(&self.stats.frames_overwritten),
            producer_full: load(&self.stats.producer_full),
            producer_waits: load(&self.stats.producer_waits),
            reallocations: load(&self.stats.reallocations),
            composition_new: load(&self.stats.composition_new),
            composition_same: load(&self.stats.composition_same),
            composition_empty: load(&self.stats.composition_empty),
            flushes: load(&self.stats.flushes),
        }
    }

    fn put_back(&self, slot: usize, sample: VideoSample) {
        let mut buffer = self.slots[slot].lock();
        if buffer.is_some() {
            panic!("sample queue: slot {} returned twice", slot);
        }
        *buffer = Some(sample);
    }

    fn claim(&self, role: Role) -> u8 {
        let backoff = Backoff::new();
        let mut word = StateViewLogicalSample::decode(self.logical.load(Ordering::Relaxed));
        loop {
            if word.is_claimed(role) {
                // Another caller of the same role is mid-update
                backoff.snooze();
                word = StateViewLogicalSample::decode(self.logical.load(Ordering::Relaxed));
                continue;
            }

            let view = word.free_view(role);
            match self.logical.compare_exchange_weak(
                word.encode(),
                word.with_claim(role, view).encode(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return view,
                Err(actual) => {
                    word = StateViewLogicalSample::decode(actual);
                    backoff.spin();
                }
            }
        }
    }

    fn update<R>(&self, role: Role, mut apply: impl FnMut(&mut ViewData) -> R) -> R {
        let scratch = self.claim(role);
        // Orders our scratch writes after any reader's copy of the old view
        fence(Ordering::Release);

        let backoff = Backoff::new();
        for _ in 0..MAX_VIEW_RETRIES {
            let mut observed = StateViewLogicalSample::decode(self.logical.load(Ordering::Acquire));
            debug_assert_eq!(observed.in_use_view[role.index()], scratch);

            let mut data = self.views[observed.current_view as usize].load();
            fence(Ordering::Acquire);
            let check = StateViewLogicalSample::decode(self.logical.load(Ordering::Relaxed));
            if check.continuity != observed.continuity {
                backoff.spin();
                continue;
            }

            let result = apply(&mut data);
            self.views[scratch as usize].store(&data);

            loop {
                match self.logical.compare_exchange_weak(
                    observed.encode(),
                    observed.published(role).encode(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return result,
                    Err(actual) => {
                        let actual = StateViewLogicalSample::decode(actual);
                        if actual.continuity != observed.continuity {
                            break;
                        }
                        // Only the other role's claim moved
                        observed = actual;
                    }
                }
            }
            backoff.spin();
        }

        panic!("sample queue: {:?} update did not converge", role);
    }
}

impl Default for SampleQueue {
    fn default() -> Self {
        Self::new()
    }
}
