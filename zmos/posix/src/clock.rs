//! Wall-clock tick source

use std::time::{Duration, Instant};

use zmos_core::Ticks;
use zmos_system::ClockSource;

use crate::{HostError, HostResult};

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// Tick counter derived from the process monotonic clock.
///
/// The count starts at zero when the clock is created and wraps at
/// `Ticks::MAX` like a hardware counter would.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    origin: Instant,
    period: Duration,
}

impl HostClock {
    /// Clock ticking `tick_rate_hz` times per second.
    pub fn new(tick_rate_hz: u32) -> HostResult<Self> {
        if tick_rate_hz == 0 || tick_rate_hz > NANOS_PER_SEC {
            return Err(HostError::InvalidTickRate(tick_rate_hz));
        }
        Ok(Self {
            origin: Instant::now(),
            period: Duration::from_nanos(u64::from(NANOS_PER_SEC / tick_rate_hz)),
        })
    }

    pub fn tick_period(&self) -> Duration {
        self.period
    }

    /// Wall time covered by `ticks`
    pub fn ticks_to_duration(&self, ticks: Ticks) -> Duration {
        self.period * ticks
    }
}

impl ClockSource for HostClock {
    fn clock_count(&self) -> Ticks {
        let ticks = self.origin.elapsed().as_nanos() / self.period.as_nanos();
        // Truncation is the counter wrapping.
        ticks as Ticks
    }
}
