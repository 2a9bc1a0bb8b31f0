//! Low-power keep-awake events

use core::cell::Cell;

use critical_section::Mutex;
use zmos_core::{critical, ZmError, ZmResult};

/// Bit held by the system until [`System::start`](crate::System::start)
pub const SYSTEM_HOLD_BIT: u8 = 31;

/// Set of reasons to stay awake.
///
/// Bits 0 to 30 belong to the application: a driver sets its bit while it
/// needs the CPU running (a transfer in flight, a debounce window) and
/// clears it when done. Bit 31 is reserved for the system. Sleep is only
/// considered while every bit is clear.
///
/// Both [`set`](LowPowerEvents::set) and [`clear`](LowPowerEvents::clear) are
/// safe to call from interrupt context.
pub struct LowPowerEvents {
    bits: Mutex<Cell<u32>>,
}

impl LowPowerEvents {
    pub const fn new() -> Self {
        Self {
            bits: Mutex::new(Cell::new(0)),
        }
    }

    /// Hold the device awake for reason `bit` (0 to 30).
    pub fn set(&self, bit: u8) -> ZmResult<()> {
        let mask = app_mask(bit)?;
        self.update(|bits| bits | mask);
        Ok(())
    }

    /// Drop keep-awake reason `bit` (0 to 30).
    pub fn clear(&self, bit: u8) -> ZmResult<()> {
        let mask = app_mask(bit)?;
        self.update(|bits| bits & !mask);
        Ok(())
    }

    /// Raw 32-bit event set
    pub fn raw(&self) -> u32 {
        critical::with(|cs| self.bits.borrow(cs).get())
    }

    /// Whether no keep-awake reason is pending
    pub fn is_clear(&self) -> bool {
        self.raw() == 0
    }

    pub(crate) fn hold(&self) {
        self.update(|bits| bits | 1 << SYSTEM_HOLD_BIT);
    }

    pub(crate) fn release(&self) {
        self.update(|bits| bits & !(1 << SYSTEM_HOLD_BIT));
    }

    /// Drop every reason, the system hold included
    pub fn reset(&self) {
        self.update(|_| 0);
    }

    fn update(&self, f: impl FnOnce(u32) -> u32) {
        critical::with(|cs| {
            let bits = self.bits.borrow(cs);
            bits.set(f(bits.get()));
        });
    }
}

impl Default for LowPowerEvents {
    fn default() -> Self {
        Self::new()
    }
}

fn app_mask(bit: u8) -> ZmResult<u32> {
    if bit < SYSTEM_HOLD_BIT {
        Ok(1 << bit)
    } else {
        Err(ZmError::InvalidParam)
    }
}

/// Global keep-awake set
static LOW_POWER_EVENTS: LowPowerEvents = LowPowerEvents::new();

/// Get the global keep-awake set
pub fn low_power_events() -> &'static LowPowerEvents {
    &LOW_POWER_EVENTS
}
