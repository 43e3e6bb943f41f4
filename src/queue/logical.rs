//! Packed arbitration word for the sample queue
//!
//! The whole "who owns which state view" decision lives in one `u32` so it can
//! be advanced with a single compare-and-swap:
//!
//! ```text
//! bits 0..2   current_view           authoritative physical view
//! bits 2..4   in_use_view[Mixer]     scratch view claimed by the mixer, or NO_VIEW
//! bits 4..6   in_use_view[Composition]
//! bits 6..32  continuity             bumped on every publish (ABA guard, wraps)
//! ```

use crate::queue::{Role, VIEW_COUNT};

/// Marker for "this role holds no scratch view"
pub const NO_VIEW: u8 = 3;

const VIEW_BITS: u32 = 2;
const VIEW_MASK: u32 = (1 << VIEW_BITS) - 1;
const CONTINUITY_SHIFT: u32 = VIEW_BITS * 3;
const CONTINUITY_BITS: u32 = 32 - CONTINUITY_SHIFT;
const CONTINUITY_MASK: u32 = (1 << CONTINUITY_BITS) - 1;

/// Decoded form of the arbitration word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateViewLogicalSample {
    /// Index of the authoritative view
    pub current_view: u8,

    /// Scratch view held by each role, indexed by [`Role::index`]
    pub in_use_view: [u8; 2],

    /// Publish counter
    pub continuity: u32,
}

impl StateViewLogicalSample {
    /// State of a freshly created queue
    pub const fn initial() -> Self {
        Self {
            current_view: 0,
            in_use_view: [NO_VIEW, NO_VIEW],
            continuity: 0,
        }
    }

    /// Pack into the atomic word
    pub fn encode(&self) -> u32 {
        (self.current_view as u32 & VIEW_MASK)
            | ((self.in_use_view[0] as u32 & VIEW_MASK) << VIEW_BITS)
            | ((self.in_use_view[1] as u32 & VIEW_MASK) << (VIEW_BITS * 2))
            | ((self.continuity & CONTINUITY_MASK) << CONTINUITY_SHIFT)
    }

    /// Unpack from the atomic word
    pub fn decode(word: u32) -> Self {
        Self {
            current_view: (word & VIEW_MASK) as u8,
            in_use_view: [
                ((word >> VIEW_BITS) & VIEW_MASK) as u8,
                ((word >> (VIEW_BITS * 2)) & VIEW_MASK) as u8,
            ],
            continuity: (word >> CONTINUITY_SHIFT) & CONTINUITY_MASK,
        }
    }

    /// Whether `role` currently holds a scratch view
    pub fn is_claimed(&self, role: Role) -> bool {
        self.in_use_view[role.index()] != NO_VIEW
    }

    /// A view that is neither authoritative nor held by the other role
    pub fn free_view(&self, role: Role) -> u8 {
        let other = self.in_use_view[role.other().index()];
        (0..VIEW_COUNT as u8)
            .find(|&view| view != self.current_view && view != other)
            .unwrap_or_else(|| {
                // Three views always leave one free for each role.
                panic!("sample queue has no free state view: {:?}", self)
            })
    }

    /// Copy of this state with `view` claimed by `role`
    pub fn with_claim(mut self, role: Role, view: u8) -> Self {
        self.in_use_view[role.index()] = view;
        self
    }

    /// Copy of this state with `role`'s scratch view made authoritative
    pub fn published(mut self, role: Role) -> Self {
        let scratch = self.in_use_view[role.index()];
        debug_assert_ne!(scratch, NO_VIEW, "publishing without a claimed view");
        self.current_view = scratch;
        self.in_use_view[role.index()] = NO_VIEW;
        self.continuity = (self.continuity + 1) & CONTINUITY_MASK;
        self
    }
}
