//! Simulated board.
//!
//! [`SimClock`] is a shared counter advanced by hand or by [`SimSleep`],
//! which "sleeps" by jumping the counter to the next timer deadline. A
//! system loop driven by the pair runs hours of device time in
//! microseconds.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::trace;
use zmos_core::{Ticks, MAX_TIMEOUT};
use zmos_system::{ClockSource, LowPowerBsp};

/// Hand-driven tick counter. Clones share the same count.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    count: Arc<AtomicU32>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter starting at `ticks`
    pub fn starting_at(ticks: Ticks) -> Self {
        Self {
            count: Arc::new(AtomicU32::new(ticks)),
        }
    }

    /// Advance the counter, wrapping at `Ticks::MAX`.
    pub fn advance(&self, ticks: Ticks) {
        self.count.fetch_add(ticks, Ordering::SeqCst);
    }
}

impl ClockSource for SimClock {
    fn clock_count(&self) -> Ticks {
        self.count.load(Ordering::SeqCst)
    }
}

/// Low-power hooks that skip the clock ahead instead of waiting.
#[derive(Debug, Clone)]
pub struct SimSleep {
    clock: SimClock,
    max_step: Ticks,
    planned: Ticks,
    sleeps: usize,
    slept: u64,
}

impl SimSleep {
    /// A sleep advances `clock` to the next deadline, but never by more than
    /// `max_step` ticks.
    pub fn new(clock: SimClock, max_step: Ticks) -> Self {
        Self {
            clock,
            max_step,
            planned: 0,
            sleeps: 0,
            slept: 0,
        }
    }

    /// Number of completed sleeps
    pub fn sleeps(&self) -> usize {
        self.sleeps
    }

    /// Total ticks spent asleep
    pub fn slept_ticks(&self) -> u64 {
        self.slept
    }
}

impl LowPowerBsp for SimSleep {
    fn before_sleep(&mut self, next_timeout: Ticks) {
        self.planned = if next_timeout == MAX_TIMEOUT {
            self.max_step
        } else {
            next_timeout.min(self.max_step)
        };
    }

    fn enter_sleep(&mut self) {
        trace!("sim sleep for {} ticks", self.planned);
    }

    fn after_sleep(&mut self) {
        self.clock.advance(self.planned);
        self.slept += u64::from(self.planned);
        self.sleeps += 1;
    }
}
