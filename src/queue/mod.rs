//! Sample queue module
//!
//! A three-slot frame queue shared by exactly two roles: the mixer thread,
//! which fills buffers, and the compositor thread, which displays them. All
//! bookkeeping (per-slot timestamps, which slot each role holds, pause and
//! flush state) lives in three physical state views arbitrated by one packed
//! atomic word, so neither role ever blocks on the other.

mod logical;
mod sample;
mod sample_queue;
mod state_view;

pub use logical::{StateViewLogicalSample, NO_VIEW};
pub use sample::{MixerSample, VideoSample};
pub use sample_queue::SampleQueue;
pub use state_view::{MixerChoice, PauseSample, ViewData};

use serde::{Deserialize, Serialize};

/// Number of frame slots
pub const SAMPLE_COUNT: usize = 3;

/// Number of physical state views
pub const VIEW_COUNT: usize = 3;

/// Slot holds no displayable frame
pub const SAMPLE_TIME_INVALID: i64 = -1;

/// Slot holds the frame preserved across a flush; displayable but older than
/// any timed frame
pub const SAMPLE_TIME_RESERVED: i64 = -2;

/// The two parties sharing the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Fills buffers; also issues flush, pause and type changes
    Mixer,

    /// Displays buffers
    Composition,
}

impl Role {
    /// Index into per-role arrays
    pub fn index(self) -> usize {
        match self {
            Role::Mixer => 0,
            Role::Composition => 1,
        }
    }

    /// The other role
    pub fn other(self) -> Role {
        match self {
            Role::Mixer => Role::Composition,
            Role::Composition => Role::Mixer,
        }
    }
}

/// Outcome of [`SampleQueue::acquire_for_producer`]
#[derive(Debug)]
pub enum ProducerAcquire {
    /// A buffer to fill
    Acquired(MixerSample),

    /// Every slot is protected or holds a future frame
    Full,

    /// The only reclaimable slot is held by or was last handed to the
    /// compositor; the consumer release that moves past it reports it
    WaitingForComposition,
}

/// Outcome of [`SampleQueue::release_from_producer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerRelease {
    /// The frame was queued
    Queued {
        /// Whether its time is already at or before the current time
        due: bool,
    },

    /// A flush happened while the buffer was held, or the frame carried no
    /// timestamp; the frame was dropped
    Discarded,
}

/// Outcome of [`SampleQueue::acquire_for_consumer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionAcquire {
    /// A slot different from the last one handed out
    New(usize),

    /// The same slot as last time, contents unchanged
    Same(usize),

    /// Nothing to display
    None,
}

impl CompositionAcquire {
    /// Slot index, if any
    pub fn slot(&self) -> Option<usize> {
        match self {
            CompositionAcquire::New(slot) | CompositionAcquire::Same(slot) => Some(*slot),
            CompositionAcquire::None => None,
        }
    }

    /// Whether a new frame is on offer
    pub fn is_new(&self) -> bool {
        matches!(self, CompositionAcquire::New(_))
    }
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Frames queued by the mixer
    pub frames_queued: u64,

    /// Frames dropped because a flush raced the mixer
    pub frames_discarded: u64,

    /// Slots reclaimed while still holding an undisplayed or stale frame
    pub frames_overwritten: u64,

    /// Producer acquires that found the queue full
    pub producer_full: u64,

    /// Producer acquires that had to wait on the compositor
    pub producer_waits: u64,

    /// Buffers reallocated after a type or device change
    pub reallocations: u64,

    /// Consumer acquires that produced a new frame
    pub composition_new: u64,

    /// Consumer acquires that repeated the last frame
    pub composition_same: u64,

    /// Consumer acquires with nothing to show
    pub composition_empty: u64,

    /// Flushes performed
    pub flushes: u64,
}
