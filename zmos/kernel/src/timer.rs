//! Software timers bound to `(task, event mask)` pairs
//!
//! A timer counts down by the ticks fed to [`Kernel::tick_update`] and, on
//! reaching zero, posts its mask to its task. Reload timers then start over
//! from their reload value; one-shot timers are removed.
//!
//! Stopping a timer only marks it [`TimerState::Stopped`]. The entry stays
//! in the list until the next tick pass reclaims it.

use log::{debug, trace, warn};
use zmos_core::{countdown, critical, Events, Ticks, ZmError, ZmResult, MAX_TIMEOUT};

use crate::{Kernel, State, TaskId};

/// Lifecycle of a timer entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// Counting down
    Running,
    /// Stopped, waiting to be reclaimed by the next tick pass
    Stopped,
}

#[cfg(feature = "defmt")]
impl defmt::Format for TimerState {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            TimerState::Running => defmt::write!(fmt, "Running"),
            TimerState::Stopped => defmt::write!(fmt, "Stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Timer {
    task: TaskId,
    mask: Events,
    remaining: Ticks,
    /// Zero for a one-shot timer
    reload: Ticks,
    state: TimerState,
}

impl Timer {
    fn matches(&self, task: TaskId, mask: Events) -> bool {
        self.state == TimerState::Running && self.task == task && self.mask == mask
    }
}

impl State {
    pub(crate) fn find_timer(&self, task: TaskId, mask: Events) -> Option<&Timer> {
        self.timers.iter().find(|timer| timer.matches(task, mask))
    }

    pub(crate) fn start_timer(&mut self, task: TaskId, mask: Events, ticks: Ticks, reload: Ticks) -> ZmResult<()> {
        if mask.is_empty() {
            return Err(ZmError::InvalidParam);
        }
        if !self.is_registered(task) {
            return Err(ZmError::InvalidTask);
        }

        if let Some(timer) = self.timers.iter_mut().find(|timer| timer.matches(task, mask)) {
            timer.remaining = ticks;
            timer.reload = reload;
            return Ok(());
        }

        let timer = Timer {
            task,
            mask,
            remaining: ticks,
            reload,
            state: TimerState::Running,
        };
        if self.timers.is_full() {
            // Make room by reclaiming stopped entries early.
            self.timers.retain(|timer| timer.state == TimerState::Running);
        }
        self.timers.push(timer).map_err(|_| {
            debug!("timer list full");
            ZmError::TableFull
        })
    }

    pub(crate) fn reload_of(&self, task: TaskId, mask: Events) -> Ticks {
        self.find_timer(task, mask).map_or(0, |timer| timer.reload)
    }
}

impl Kernel {
    /// Start a one-shot timer posting `mask` to `task` after `ticks`.
    ///
    /// An existing timer for the same pair is restarted in place and
    /// becomes one-shot.
    pub fn start_oneshot(&self, task: TaskId, mask: Events, ticks: Ticks) -> ZmResult<()> {
        critical::with(|cs| {
            self.state
                .borrow_ref_mut(cs)
                .start_timer(task, mask, ticks, 0)
        })
    }

    /// Start a timer posting `mask` to `task` every `ticks`.
    ///
    /// An existing timer for the same pair is restarted in place.
    pub fn start_reload(&self, task: TaskId, mask: Events, ticks: Ticks) -> ZmResult<()> {
        critical::with(|cs| {
            self.state
                .borrow_ref_mut(cs)
                .start_timer(task, mask, ticks, ticks)
        })
    }

    /// Stop the timer for `(task, mask)`. Returns whether one was running.
    pub fn stop(&self, task: TaskId, mask: Events) -> bool {
        critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            match state.timers.iter_mut().find(|timer| timer.matches(task, mask)) {
                Some(timer) => {
                    timer.state = TimerState::Stopped;
                    true
                }
                None => false,
            }
        })
    }

    /// Ticks left on the timer for `(task, mask)`, 0 if there is none
    pub fn current_timeout(&self, task: TaskId, mask: Events) -> Ticks {
        critical::with(|cs| {
            self.state
                .borrow_ref(cs)
                .find_timer(task, mask)
                .map_or(0, |timer| timer.remaining)
        })
    }

    /// Reload value of the timer for `(task, mask)`, 0 if it is one-shot or
    /// there is none
    pub fn reload_timeout(&self, task: TaskId, mask: Events) -> Ticks {
        critical::with(|cs| self.state.borrow_ref(cs).reload_of(task, mask))
    }

    /// State of the timer for `(task, mask)`.
    ///
    /// `Stopped` is only reported until the next tick pass reclaims the
    /// entry; afterwards the pair is unknown and `None` is returned.
    pub fn timer_state(&self, task: TaskId, mask: Events) -> Option<TimerState> {
        critical::with(|cs| {
            let state = self.state.borrow_ref(cs);
            let mut found = None;
            for timer in state.timers.iter().filter(|t| t.task == task && t.mask == mask) {
                if timer.state == TimerState::Running {
                    return Some(TimerState::Running);
                }
                found = Some(TimerState::Stopped);
            }
            found
        })
    }

    /// Entries in the timer list, stopped ones included
    pub fn timer_slots_used(&self) -> usize {
        critical::with(|cs| self.state.borrow_ref(cs).timers.len())
    }

    /// Smallest remaining tick count over all running timers, or
    /// [`MAX_TIMEOUT`] when none is running
    pub fn next_lowest_timeout(&self) -> Ticks {
        critical::with(|cs| {
            self.state
                .borrow_ref(cs)
                .timers
                .iter()
                .filter(|timer| timer.state == TimerState::Running)
                .map(|timer| timer.remaining)
                .min()
                .unwrap_or(MAX_TIMEOUT)
        })
    }

    /// Advance the kernel clock by `elapsed` ticks and run one timer pass.
    ///
    /// Every entry is visited once. Expired timers post their mask and
    /// reload, or are removed if one-shot. Stopped entries are removed, as
    /// are timers whose task has been unregistered; those never fire.
    pub fn tick_update(&self, elapsed: Ticks) {
        critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let State {
                clock,
                tasks,
                timers,
                ..
            } = &mut *state;

            clock.advance(elapsed);

            timers.retain_mut(|timer| {
                if timer.state == TimerState::Stopped {
                    return false;
                }

                timer.remaining = countdown(timer.remaining, elapsed);
                if timer.remaining > 0 {
                    return true;
                }

                match tasks.iter_mut().find(|task| task.id == timer.task) {
                    Some(task) => {
                        task.events |= timer.mask;
                        trace!("timer fired: {} {}", timer.task, timer.mask);
                    }
                    None => {
                        warn!("dropping timer of unregistered {}", timer.task);
                        return false;
                    }
                }
                timer.remaining = timer.reload;
                timer.remaining > 0
            });
        });
    }
}
