#![no_std]
#![forbid(unsafe_code)]

//! # ZMOS System Loop
//!
//! Binds the kernel to the board: each pass of the main loop feeds the
//! ticks counted by the hardware clock into the timer list, runs one
//! scheduling pass and, with low power enabled, puts the device to sleep
//! until the next timer deadline.
//!
//! The board supplies a [`ClockSource`] (a free-running counter advanced by
//! a timer interrupt) and a [`LowPowerBsp`] (the register sequences around
//! sleep). Both are assumed infallible.

use log::{debug, trace};
use zmos_core::{Ticks, ZmResult};
use zmos_kernel::{Kernel, TaskFn};

pub mod lowpower;

pub use lowpower::{low_power_events, LowPowerEvents, SYSTEM_HOLD_BIT};

/// Free-running hardware tick counter
pub trait ClockSource {
    /// Current counter value. Wraps at `Ticks::MAX`.
    fn clock_count(&self) -> Ticks;
}

impl<T: ClockSource + ?Sized> ClockSource for &T {
    fn clock_count(&self) -> Ticks {
        (**self).clock_count()
    }
}

/// Board hooks around low-power sleep
pub trait LowPowerBsp {
    /// Prepare for sleep. `next_timeout` is the number of ticks until the
    /// earliest timer deadline, or [`zmos_core::MAX_TIMEOUT`] if no timer is
    /// running.
    fn before_sleep(&mut self, next_timeout: Ticks);

    /// Enter the sleep state; returns on wake-up.
    fn enter_sleep(&mut self);

    /// Restore clocks after wake-up and bring the tick counter up to date
    /// with the time spent asleep.
    fn after_sleep(&mut self);
}

/// Low-power hooks of a board that never sleeps
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSleep;

impl LowPowerBsp for NoSleep {
    fn before_sleep(&mut self, _next_timeout: Ticks) {}
    fn enter_sleep(&mut self) {}
    fn after_sleep(&mut self) {}
}

/// System loop configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemConfig {
    /// Let the loop put the device to sleep
    pub low_power: bool,
    /// Only sleep once no task has pending events
    pub wait_idle: bool,
}

impl SystemConfig {
    /// Low power off, waiting for idle when enabled
    pub const fn new() -> Self {
        Self {
            low_power: false,
            wait_idle: true,
        }
    }

    pub const fn low_power(self, enabled: bool) -> Self {
        Self {
            low_power: enabled,
            ..self
        }
    }

    pub const fn wait_idle(self, enabled: bool) -> Self {
        Self {
            wait_idle: enabled,
            ..self
        }
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SystemConfig {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "SystemConfig{{low_power: {}, wait_idle: {}}}",
            self.low_power,
            self.wait_idle
        );
    }
}

/// The main loop of a ZMOS device.
pub struct System<'k, C, L> {
    kernel: &'k Kernel,
    lpm: &'k LowPowerEvents,
    clock: C,
    bsp: L,
    config: SystemConfig,
    /// Hardware count that corresponds to kernel tick zero
    epoch: Ticks,
}

impl<'k, C: ClockSource, L: LowPowerBsp> System<'k, C, L> {
    /// Bring up the kernel and bind it to the board.
    ///
    /// The kernel is re-initialized, so register tasks afterwards. The
    /// device is kept awake until [`System::start`].
    pub fn new(
        kernel: &'k Kernel,
        lpm: &'k LowPowerEvents,
        clock: C,
        bsp: L,
        config: SystemConfig,
    ) -> Self {
        kernel.init();
        Self::bind(kernel, lpm, clock, bsp, config)
    }

    /// [`System::new`] with a fixed set of tasks registered at bring-up,
    /// in order.
    pub fn with_tasks(
        kernel: &'k Kernel,
        lpm: &'k LowPowerEvents,
        clock: C,
        bsp: L,
        config: SystemConfig,
        tasks: &[TaskFn],
    ) -> ZmResult<Self> {
        kernel.init_with(tasks)?;
        Ok(Self::bind(kernel, lpm, clock, bsp, config))
    }

    fn bind(
        kernel: &'k Kernel,
        lpm: &'k LowPowerEvents,
        clock: C,
        bsp: L,
        config: SystemConfig,
    ) -> Self {
        lpm.hold();
        let epoch = clock.clock_count();
        debug!("system up at hardware tick {}", epoch);
        Self {
            kernel,
            lpm,
            clock,
            bsp,
            config,
            epoch,
        }
    }

    pub fn kernel(&self) -> &'k Kernel {
        self.kernel
    }

    pub fn low_power_events(&self) -> &'k LowPowerEvents {
        self.lpm
    }

    pub fn config(&self) -> SystemConfig {
        self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn bsp(&self) -> &L {
        &self.bsp
    }

    pub fn bsp_mut(&mut self) -> &mut L {
        &mut self.bsp
    }

    /// Release the start-up hold so the device may sleep.
    pub fn start(&mut self) {
        self.lpm.release();
        debug!("system started");
    }

    /// Ticks counted by the hardware but not yet fed to the kernel
    pub fn pending_ticks(&self) -> Ticks {
        self.clock
            .clock_count()
            .wrapping_sub(self.epoch)
            .wrapping_sub(self.kernel.get_clock())
    }

    /// One pass of the main loop.
    ///
    /// Returns `true` if a task was dispatched.
    pub fn run_once(&mut self) -> bool {
        let elapsed = self.pending_ticks();
        if elapsed != 0 {
            self.kernel.tick_update(elapsed);
        }

        let dispatched = self.kernel.schedule_once();

        if self.config.low_power {
            self.manage_low_power();
        }
        dispatched
    }

    /// Run the main loop forever.
    pub fn run(&mut self) -> ! {
        self.start();
        loop {
            self.run_once();
        }
    }

    fn manage_low_power(&mut self) {
        if !self.lpm.is_clear() {
            return;
        }
        if self.config.wait_idle && !self.kernel.is_idle() {
            return;
        }

        let next_timeout = self.kernel.next_lowest_timeout();
        trace!("sleeping, next deadline in {} ticks", next_timeout);
        self.bsp.before_sleep(next_timeout);
        self.bsp.enter_sleep();
        self.bsp.after_sleep();
    }
}
