//! Callback timers
//!
//! A fixed table of [`CBTIMER_SLOTS`] callbacks, each backed by an ordinary
//! timer on the internal callback task whose mask is the single bit of the
//! slot index. When the bit fires, the task runs the stored callback.

use core::fmt;

use log::{debug, trace};
use zmos_core::{critical, Events, Ticks, ZmError, ZmResult};

use crate::{Kernel, State, CBTIMER_SLOTS};

/// Callback run when a callback timer expires.
///
/// Gets the kernel and the argument given at start. Runs in task context
/// and must not block.
pub type CbTimerFn = fn(&Kernel, usize);

/// Handle of a callback timer slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CbTimerId(u8);

impl CbTimerId {
    /// Slot index in the callback table
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    fn mask(self) -> Events {
        Events::bit(self.0 as u32)
    }
}

impl fmt::Display for CbTimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cbtimer#{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for CbTimerId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "cbtimer#{}", self.0);
    }
}

#[derive(Clone, Copy)]
pub(crate) struct CbSlot {
    func: CbTimerFn,
    arg: usize,
}

/// Handler of the internal callback task
pub(crate) fn cbtimer_task(kernel: &Kernel, events: Events) -> Events {
    for bit in events.iter() {
        if (bit as usize) < CBTIMER_SLOTS {
            kernel.dispatch_cbtimer(CbTimerId(bit as u8));
        }
    }
    Events::NONE
}

impl State {
    fn cb_task(&self) -> ZmResult<crate::TaskId> {
        self.cb_task.ok_or(ZmError::InvalidTask)
    }
}

impl Kernel {
    /// Start a one-shot callback timer running `func(arg)` after `ticks`.
    ///
    /// The slot is released once the callback has run.
    pub fn cbtimer_start_oneshot(&self, ticks: Ticks, arg: usize, func: CbTimerFn) -> ZmResult<CbTimerId> {
        self.cbtimer_start(ticks, 0, arg, func)
    }

    /// Start a callback timer running `func(arg)` every `ticks`.
    pub fn cbtimer_start_reload(&self, ticks: Ticks, arg: usize, func: CbTimerFn) -> ZmResult<CbTimerId> {
        self.cbtimer_start(ticks, ticks, arg, func)
    }

    fn cbtimer_start(&self, ticks: Ticks, reload: Ticks, arg: usize, func: CbTimerFn) -> ZmResult<CbTimerId> {
        critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let task = state.cb_task()?;
            let Some(index) = state.cb_slots.iter().position(Option::is_none) else {
                debug!("no free callback timer slot");
                return Err(ZmError::TableFull);
            };
            let id = CbTimerId(index as u8);

            state.cb_slots[index] = Some(CbSlot { func, arg });
            if let Err(err) = state.start_timer(task, id.mask(), ticks, reload) {
                state.cb_slots[index] = None;
                return Err(err);
            }
            Ok(id)
        })
    }

    /// Restart a callback timer with a new timeout, keeping its kind.
    pub fn cbtimer_change_timeout(&self, id: CbTimerId, ticks: Ticks) -> ZmResult<()> {
        critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let task = state.cb_task()?;
            if state.cb_slots.get(id.index()).copied().flatten().is_none() {
                return Err(ZmError::NotFound);
            }
            let reload = if state.reload_of(task, id.mask()) > 0 { ticks } else { 0 };
            state.start_timer(task, id.mask(), ticks, reload)
        })
    }

    /// Stop a callback timer and release its slot.
    ///
    /// Returns whether the slot was occupied.
    pub fn cbtimer_stop(&self, id: CbTimerId) -> bool {
        let task = critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let slot = state.cb_slots.get_mut(id.index())?;
            slot.take()?;
            state.cb_task
        });
        match task {
            Some(task) => {
                self.stop(task, id.mask());
                true
            }
            None => false,
        }
    }

    /// Whether the slot of `id` holds a callback
    pub fn cbtimer_is_active(&self, id: CbTimerId) -> bool {
        critical::with(|cs| {
            self.state
                .borrow_ref(cs)
                .cb_slots
                .get(id.index())
                .is_some_and(Option::is_some)
        })
    }

    fn dispatch_cbtimer(&self, id: CbTimerId) {
        let slot = critical::with(|cs| self.state.borrow_ref(cs).cb_slots[id.index()]);
        if let Some(slot) = slot {
            trace!("{} expired", id);
            (slot.func)(self, slot.arg);
        }

        // A fired one-shot has left the timer list. A running entry means a
        // reload timer, or a timer the callback started in this same slot.
        critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let armed = state
                .cb_task
                .is_some_and(|task| state.find_timer(task, id.mask()).is_some());
            if !armed {
                state.cb_slots[id.index()] = None;
            }
        });
    }
}
