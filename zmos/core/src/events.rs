//! Task event masks

use core::fmt;
use core::ops::{BitAnd, BitAndAssign, BitOr, BitOrAssign, Not};

/// Raw storage of a task event mask, sized by the `events-8` / `events-16`
/// features (32 bits otherwise).
#[cfg(feature = "events-8")]
pub type EventBits = u8;
#[cfg(all(feature = "events-16", not(feature = "events-8")))]
pub type EventBits = u16;
#[cfg(not(any(feature = "events-8", feature = "events-16")))]
pub type EventBits = u32;

/// Set of pending event bits of a task.
///
/// Each bit's meaning belongs to the task that owns it. A task is ready to
/// run whenever its mask is non-empty.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Events(pub EventBits);

impl Events {
    /// No pending events
    pub const NONE: Self = Self(0);

    /// Every representable event bit
    pub const ALL: Self = Self(EventBits::MAX);

    /// Number of distinct event bits a task can carry
    pub const BITS: u32 = EventBits::BITS;

    /// Create a mask from raw bits
    pub const fn new(bits: EventBits) -> Self {
        Self(bits)
    }

    /// Mask with only bit `n` set.
    ///
    /// Bits beyond [`Events::BITS`] yield an empty mask.
    pub const fn bit(n: u32) -> Self {
        if n < Self::BITS {
            Self(1 << n)
        } else {
            Self::NONE
        }
    }

    /// Get the raw bits
    pub const fn raw(self) -> EventBits {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check whether every bit of `other` is set in `self`
    pub const fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// Check whether any bit of `other` is set in `self`
    pub const fn intersects(self, other: Events) -> bool {
        self.0 & other.0 != 0
    }

    /// Index of the lowest set bit
    pub const fn lowest(self) -> Option<u32> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros())
        }
    }

    /// Iterate over the indices of the set bits, lowest first
    pub fn iter(self) -> EventIter {
        EventIter { remaining: self }
    }
}

impl From<EventBits> for Events {
    #[inline]
    fn from(value: EventBits) -> Self {
        Self(value)
    }
}

impl BitOr for Events {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Events {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl BitAndAssign for Events {
    fn bitand_assign(&mut self, rhs: Self) {
        self.0 &= rhs.0;
    }
}

impl Not for Events {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EVT({:#x})", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Events {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "EVT({=u32:#x})", self.0 as u32);
    }
}

/// Iterator over set bit indices of an [`Events`] mask
#[derive(Debug, Clone)]
pub struct EventIter {
    remaining: Events,
}

impl Iterator for EventIter {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let n = self.remaining.lowest()?;
        self.remaining &= !Events::bit(n);
        Some(n)
    }
}

/// Build an [`Events`] mask from a list of bit indices
#[macro_export]
macro_rules! events {
    ($($bit:expr),* $(,)?) => {
        $crate::Events::NONE $(| $crate::Events::bit($bit))*
    };
}
