#![no_std]
#![forbid(unsafe_code)]

//! # ZMOS Kernel
//!
//! The cooperative, run-to-completion core of ZMOS:
//!
//! - a task registry serviced in registration order, one task per pass
//! - a software timer list bound to `(task, event mask)` pairs, driven by
//!   [`Kernel::tick_update`]
//! - callback timers multiplexed onto the event bits of one internal task
//!
//! All kernel state lives in a single [`Kernel`] object guarded by the
//! process-wide critical-section counter. Task handlers and timer callbacks
//! are always invoked with the lock released, so they may freely call back
//! into the kernel.
//!
//! Handlers must return promptly. Nothing in the kernel can preempt a
//! handler that blocks or loops, and the whole system stalls with it.

#[cfg(test)]
extern crate std;

use core::cell::RefCell;

use critical_section::Mutex;
use heapless::Vec;
use zmos_core::{critical, Events, TickClock, ZmResult};

pub mod cbtimer;
pub mod task;
pub mod timer;

#[cfg(test)]
mod tests;

pub use cbtimer::{CbTimerFn, CbTimerId};
pub use task::{TaskFn, TaskId};
pub use timer::TimerState;

use cbtimer::CbSlot;
use task::Task;
use timer::Timer;

/// Capacity of the task registry
pub const MAX_TASKS: usize = 16;

/// Capacity of the timer list, stopped timers awaiting reclaim included
pub const MAX_TIMERS: usize = 32;

/// Number of callback timer slots
pub const CBTIMER_SLOTS: usize = 8;

const _: () = assert!(
    CBTIMER_SLOTS as u32 <= Events::BITS,
    "callback timer slots cannot exceed the event mask width"
);

struct State {
    /// Registration order
    tasks: Vec<Task, MAX_TASKS>,
    /// Insertion order
    timers: Vec<Timer, MAX_TIMERS>,
    clock: TickClock,
    current: Option<TaskId>,
    idle_hook: Option<fn()>,
    next_serial: u32,
    cb_task: Option<TaskId>,
    cb_slots: [Option<CbSlot>; CBTIMER_SLOTS],
}

impl State {
    const fn new() -> Self {
        Self {
            tasks: Vec::new(),
            timers: Vec::new(),
            clock: TickClock::ZERO,
            current: None,
            idle_hook: None,
            next_serial: 1,
            cb_task: None,
            cb_slots: [None; CBTIMER_SLOTS],
        }
    }
}

/// Kernel context: task registry, timer list, tick clock and callback slots.
pub struct Kernel {
    state: Mutex<RefCell<State>>,
}

impl Kernel {
    /// Create an empty kernel.
    ///
    /// Call [`Kernel::init`] before use so the callback timer task exists.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(State::new())),
        }
    }

    /// Bring the kernel up from scratch.
    ///
    /// Drops every task and timer, zeroes the tick clock and registers the
    /// internal callback timer task. Task handles issued before the call
    /// become stale.
    pub fn init(&self) {
        critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let serial = state.next_serial;
            *state = State::new();
            state.next_serial = serial;
        });

        // An empty registry always has room.
        let cb_task = self.register(cbtimer::cbtimer_task).ok();
        critical::with(|cs| {
            self.state.borrow_ref_mut(cs).cb_task = cb_task;
        });
        log::debug!("kernel initialized");
    }

    /// Bring the kernel up with a fixed set of tasks.
    ///
    /// Runs [`Kernel::init`], then registers `tasks` in order, ahead of any
    /// task registered later. Stops at the first task that does not fit.
    pub fn init_with(&self, tasks: &[TaskFn]) -> ZmResult<()> {
        self.init();
        for task in tasks {
            self.register(*task)?;
        }
        Ok(())
    }

    /// Tick count processed so far by [`Kernel::tick_update`]
    pub fn get_clock(&self) -> zmos_core::Ticks {
        critical::with(|cs| self.state.borrow_ref(cs).clock.raw())
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

/// Global kernel instance
static KERNEL: Kernel = Kernel::new();

/// Get the global kernel, the one interrupt handlers post events to.
pub fn kernel() -> &'static Kernel {
    &KERNEL
}

#[cfg(feature = "defmt")]
impl defmt::Format for Kernel {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "Kernel{{clock: {}, idle: {}, timers: {}}}",
            self.get_clock(),
            self.is_idle(),
            self.timer_slots_used()
        );
    }
}
