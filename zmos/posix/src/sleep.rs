//! Thread-sleep low-power hooks

use std::thread;
use std::time::Duration;

use log::trace;
use zmos_core::{Ticks, MAX_TIMEOUT};
use zmos_system::LowPowerBsp;

/// Sleeps the calling thread until the next timer deadline.
///
/// Nothing can wake a sleeping thread early, so every sleep is capped at
/// `max_sleep` to keep events posted from other threads responsive.
#[derive(Debug, Clone)]
pub struct HostSleep {
    period: Duration,
    max_sleep: Duration,
    planned: Duration,
}

impl HostSleep {
    pub fn new(tick_period: Duration, max_sleep: Duration) -> Self {
        Self {
            period: tick_period,
            max_sleep,
            planned: Duration::ZERO,
        }
    }

    /// Length of the sleep prepared by the last `before_sleep`
    pub fn planned(&self) -> Duration {
        self.planned
    }
}

impl LowPowerBsp for HostSleep {
    fn before_sleep(&mut self, next_timeout: Ticks) {
        self.planned = if next_timeout == MAX_TIMEOUT {
            self.max_sleep
        } else {
            self.period
                .checked_mul(next_timeout)
                .map_or(self.max_sleep, |wait| wait.min(self.max_sleep))
        };
        trace!("sleeping for {:?}", self.planned);
    }

    fn enter_sleep(&mut self) {
        if !self.planned.is_zero() {
            thread::sleep(self.planned);
        }
    }

    // The monotonic clock kept counting.
    fn after_sleep(&mut self) {}
}
