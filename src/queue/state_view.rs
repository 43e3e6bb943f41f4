//! Physical state views and slot choice
//!
//! A [`StateView`] is the atomic storage for one copy of the queue's
//! bookkeeping. Fields are read and written with relaxed ordering; the
//! arbitration word in [`super::logical`] provides all synchronization.
//! [`ViewData`] is the plain snapshot the two roles actually reason about.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};

use crate::queue::{SAMPLE_COUNT, SAMPLE_TIME_INVALID, SAMPLE_TIME_RESERVED};

const NO_SLOT: u8 = 3;
const NO_PAUSE_SAMPLE: u8 = 4;

/// Pause state of the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseSample {
    /// Not paused
    None,

    /// Paused on this slot; the compositor shows only it
    Slot(usize),

    /// Paused with nothing eligible to show
    NoPauseSample,
}

/// Result of the mixer's slot choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixerChoice {
    /// Slot to fill
    Slot(usize),

    /// Nothing reclaimable
    Full,

    /// The only stale slot is the compositor's
    Blocked(usize),
}

/// Snapshot of one state view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewData {
    /// Presentation time per slot, or one of the sentinels
    pub sample_times: [i64; SAMPLE_COUNT],

    /// Slot the mixer is filling
    pub mixer_sample: Option<usize>,

    /// Slot the compositor is displaying
    pub composition_sample: Option<usize>,

    /// Slot most recently handed to the compositor
    pub last_composition_sample: Option<usize>,

    /// Pause state
    pub pause_sample: PauseSample,

    /// Slot the mixer is blocked on, reported at the first consumer release
    /// that leaves it behind
    pub mixer_waiting_on: Option<usize>,

    /// A flush happened while the mixer held its slot
    pub mixer_flushed: bool,
}

impl Default for ViewData {
    fn default() -> Self {
        Self {
            sample_times: [SAMPLE_TIME_INVALID; SAMPLE_COUNT],
            mixer_sample: None,
            composition_sample: None,
            last_composition_sample: None,
            pause_sample: PauseSample::None,
            mixer_waiting_on: None,
            mixer_flushed: false,
        }
    }
}

impl ViewData {
    /// Whether `time` can be shown: a real timestamp or the reserved frame
    pub fn is_displayable(time: i64) -> bool {
        time >= 0 || time == SAMPLE_TIME_RESERVED
    }

    /// Slots the mixer is not writing into
    fn readable_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..SAMPLE_COUNT).filter(move |&slot| Some(slot) != self.mixer_sample)
    }

    /// Slot with the largest valid time at or before `now`
    pub fn most_recent_due(&self, now: i64) -> Option<usize> {
        let mut best: Option<usize> = None;
        for slot in self.readable_slots() {
            let time = self.sample_times[slot];
            if time < 0 || time > now {
                continue;
            }
            match best {
                Some(b) if self.sample_times[b] >= time => {}
                _ => best = Some(slot),
            }
        }
        best
    }

    /// Slot preserved by the last flush
    pub fn reserved_slot(&self) -> Option<usize> {
        self.readable_slots()
            .find(|&slot| self.sample_times[slot] == SAMPLE_TIME_RESERVED)
    }

    /// Slot with the smallest valid time strictly after `now`
    pub fn earliest_after(&self, now: i64) -> Option<usize> {
        let mut best: Option<usize> = None;
        for slot in self.readable_slots() {
            let time = self.sample_times[slot];
            if time < 0 || time <= now {
                continue;
            }
            match best {
                Some(b) if self.sample_times[b] <= time => {}
                _ => best = Some(slot),
            }
        }
        best
    }

    /// Slot the compositor should show at `now`
    ///
    /// The most recent due frame wins; the reserved frame is the fallback.
    pub fn choose_composition(&self, now: i64) -> Option<usize> {
        self.most_recent_due(now).or_else(|| self.reserved_slot())
    }

    /// Slot the mixer may fill at `now`
    ///
    /// Protected slots are the one the compositor holds, the last slot it
    /// was handed, the pause slot and the display candidate. Empty slots go
    /// first (lowest index), then the oldest frame below the display
    /// candidate's time. When only a stale compositor slot stands in the
    /// way the mixer waits on it.
    pub fn choose_mixer(&self, now: i64) -> MixerChoice {
        debug_assert!(self.mixer_sample.is_none(), "mixer already holds a slot");

        let display = self.choose_composition(now);
        let floor = display
            .map(|slot| self.sample_times[slot])
            .filter(|&time| time >= 0);
        let pause_slot = match self.pause_sample {
            PauseSample::Slot(slot) => Some(slot),
            _ => None,
        };

        let protected = |slot: usize| {
            Some(slot) == self.composition_sample
                || Some(slot) == pause_slot
                || Some(slot) == display
                || Some(slot) == self.last_composition_sample
        };
        let is_stale = |time: i64, floor: i64| {
            time == SAMPLE_TIME_RESERVED || (time >= 0 && time < floor)
        };

        if let Some(slot) = (0..SAMPLE_COUNT)
            .find(|&slot| !protected(slot) && self.sample_times[slot] == SAMPLE_TIME_INVALID)
        {
            return MixerChoice::Slot(slot);
        }

        let Some(floor) = floor else {
            return MixerChoice::Full;
        };

        let mut oldest: Option<usize> = None;
        for slot in (0..SAMPLE_COUNT).filter(|&slot| !protected(slot)) {
            let time = self.sample_times[slot];
            if !is_stale(time, floor) {
                continue;
            }
            // RESERVED sorts below every real timestamp
            match oldest {
                Some(o) if self.sample_times[o] <= time => {}
                _ => oldest = Some(slot),
            }
        }
        if let Some(slot) = oldest {
            return MixerChoice::Slot(slot);
        }

        match self.composition_sample.or(self.last_composition_sample) {
            Some(held)
                if Some(held) != display
                    && Some(held) != pause_slot
                    && is_stale(self.sample_times[held], floor) =>
            {
                MixerChoice::Blocked(held)
            }
            _ => MixerChoice::Full,
        }
    }

    /// Smallest valid time among readable slots
    pub fn smallest_time(&self) -> Option<i64> {
        self.readable_slots()
            .map(|slot| self.sample_times[slot])
            .filter(|&time| time >= 0)
            .min()
    }

    /// Largest valid time among readable slots
    pub fn largest_time(&self) -> Option<i64> {
        self.readable_slots()
            .map(|slot| self.sample_times[slot])
            .filter(|&time| time >= 0)
            .max()
    }

    /// Number of slots with the reserved sentinel
    pub fn reserved_count(&self) -> usize {
        self.sample_times
            .iter()
            .filter(|&&time| time == SAMPLE_TIME_RESERVED)
            .count()
    }
}

fn encode_slot(slot: Option<usize>) -> u8 {
    slot.map_or(NO_SLOT, |s| s as u8)
}

fn decode_slot(raw: u8) -> Option<usize> {
    if (raw as usize) < SAMPLE_COUNT {
        Some(raw as usize)
    } else {
        None
    }
}

fn encode_pause(pause: PauseSample) -> u8 {
    match pause {
        PauseSample::None => NO_SLOT,
        PauseSample::Slot(slot) => slot as u8,
        PauseSample::NoPauseSample => NO_PAUSE_SAMPLE,
    }
}

fn decode_pause(raw: u8) -> PauseSample {
    match raw {
        NO_PAUSE_SAMPLE => PauseSample::NoPauseSample,
        raw => decode_slot(raw).map_or(PauseSample::None, PauseSample::Slot),
    }
}

/// Atomic storage for one copy of the bookkeeping
#[derive(Debug)]
pub(crate) struct StateView {
    sample_times: [AtomicI64; SAMPLE_COUNT],
    mixer_sample: AtomicU8,
    composition_sample: AtomicU8,
    last_composition_sample: AtomicU8,
    pause_sample: AtomicU8,
    mixer_waiting_on: AtomicU8,
    mixer_flushed: AtomicBool,
}

impl StateView {
    pub(crate) fn new() -> Self {
        Self {
            sample_times: std::array::from_fn(|_| AtomicI64::new(SAMPLE_TIME_INVALID)),
            mixer_sample: AtomicU8::new(NO_SLOT),
            composition_sample: AtomicU8::new(NO_SLOT),
            last_composition_sample: AtomicU8::new(NO_SLOT),
            pause_sample: AtomicU8::new(NO_SLOT),
            mixer_waiting_on: AtomicU8::new(NO_SLOT),
            mixer_flushed: AtomicBool::new(false),
        }
    }

    /// Copy the fields out; may be torn if the view is being recycled
    pub(crate) fn load(&self) -> ViewData {
        ViewData {
            sample_times: std::array::from_fn(|i| self.sample_times[i].load(Ordering::Relaxed)),
            mixer_sample: decode_slot(self.mixer_sample.load(Ordering::Relaxed)),
            composition_sample: decode_slot(self.composition_sample.load(Ordering::Relaxed)),
            last_composition_sample: decode_slot(
                self.last_composition_sample.load(Ordering::Relaxed),
            ),
            pause_sample: decode_pause(self.pause_sample.load(Ordering::Relaxed)),
            mixer_waiting_on: decode_slot(self.mixer_waiting_on.load(Ordering::Relaxed)),
            mixer_flushed: self.mixer_flushed.load(Ordering::Relaxed),
        }
    }

    /// Overwrite the fields; only the role holding this view may call it
    pub(crate) fn store(&self, data: &ViewData) {
        for (slot, time) in self.sample_times.iter().zip(data.sample_times) {
            slot.store(time, Ordering::Relaxed);
        }
        self.mixer_sample
            .store(encode_slot(data.mixer_sample), Ordering::Relaxed);
        self.composition_sample
            .store(encode_slot(data.composition_sample), Ordering::Relaxed);
        self.last_composition_sample
            .store(encode_slot(data.last_composition_sample), Ordering::Relaxed);
        self.pause_sample
            .store(encode_pause(data.pause_sample), Ordering::Relaxed);
        self.mixer_waiting_on
            .store(encode_slot(data.mixer_waiting_on), Ordering::Relaxed);
        self.mixer_flushed
            .store(data.mixer_flushed, Ordering::Relaxed);
    }
}
