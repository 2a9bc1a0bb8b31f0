//! Tick types shared by the timer subsystem and the system loop

use core::fmt;

/// Timer tick count
pub type Ticks = u32;

/// Returned by the next-deadline query when no timer is armed
pub const MAX_TIMEOUT: Ticks = Ticks::MAX;

/// Free-running tick clock.
///
/// Both the hardware counter and the kernel's copy of it are 32-bit values
/// that wrap. All arithmetic is modular, so the delta between two readings is
/// correct as long as fewer than `2^32` ticks pass between them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TickClock(Ticks);

impl TickClock {
    /// Zero tick
    pub const ZERO: Self = Self(0);

    /// Create a clock reading
    pub const fn new(ticks: Ticks) -> Self {
        Self(ticks)
    }

    /// Get the raw tick value
    pub const fn raw(self) -> Ticks {
        self.0
    }

    /// Advance the clock, wrapping on overflow
    pub fn advance(&mut self, ticks: Ticks) {
        self.0 = self.0.wrapping_add(ticks);
    }

    /// Ticks elapsed since an earlier reading
    pub const fn elapsed_since(self, earlier: TickClock) -> Ticks {
        self.0.wrapping_sub(earlier.0)
    }
}

impl From<Ticks> for TickClock {
    fn from(value: Ticks) -> Self {
        Self(value)
    }
}

impl fmt::Display for TickClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tick:{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TickClock {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "tick:{}", self.0);
    }
}

/// Remaining ticks of a countdown after `elapsed` ticks, floored at zero
#[inline]
pub const fn countdown(remaining: Ticks, elapsed: Ticks) -> Ticks {
    remaining.saturating_sub(elapsed)
}
