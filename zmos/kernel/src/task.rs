//! Task registry and the scheduling pass

use core::fmt;

use log::{debug, trace, warn};
use zmos_core::{critical, Events, ZmError, ZmResult};

use crate::{Kernel, State};

/// Task handler.
///
/// Receives the kernel and the snapshot of pending events; returns the
/// events it did not service, which stay pending for a later pass. A handler
/// runs to completion and must not block.
pub type TaskFn = fn(&Kernel, Events) -> Events;

/// Handle of a registered task.
///
/// Handles carry a registration serial that is never reused, so a handle
/// kept past [`Kernel::unregister`] can never reach a different task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u32);

impl TaskId {
    /// Registration serial of the task
    pub const fn serial(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for TaskId {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "task#{}", self.0);
    }
}

pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) handler: TaskFn,
    pub(crate) events: Events,
}

/// Handlers are identified by address.
fn same_handler(a: TaskFn, b: TaskFn) -> bool {
    a as usize == b as usize
}

impl State {
    pub(crate) fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == id)
    }

    pub(crate) fn is_registered(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|task| task.id == id)
    }
}

impl Kernel {
    /// Register a task handler.
    ///
    /// Registering a handler that is already registered returns the
    /// existing handle.
    pub fn register(&self, handler: TaskFn) -> ZmResult<TaskId> {
        critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if let Some(task) = state.tasks.iter().find(|t| same_handler(t.handler, handler)) {
                return Ok(task.id);
            }

            let id = TaskId(state.next_serial);
            state
                .tasks
                .push(Task {
                    id,
                    handler,
                    events: Events::NONE,
                })
                .map_err(|_| {
                    debug!("task registry full");
                    ZmError::TableFull
                })?;
            state.next_serial = state.next_serial.wrapping_add(1);
            debug!("registered {}", id);
            Ok(id)
        })
    }

    /// Remove a task from the registry.
    ///
    /// `None` removes the task whose handler is currently running. Timers
    /// bound to the task are left in place; the next tick pass discards
    /// them without firing. Returns whether a task was removed.
    pub fn unregister(&self, id: Option<TaskId>) -> bool {
        critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let Some(id) = id.or(state.current) else {
                return false;
            };
            match state.tasks.iter().position(|task| task.id == id) {
                Some(at) => {
                    state.tasks.remove(at);
                    debug!("unregistered {}", id);
                    true
                }
                None => false,
            }
        })
    }

    /// Post events to a task. Safe to call from interrupt context.
    ///
    /// A stale handle is ignored.
    pub fn set_event(&self, id: TaskId, events: Events) -> ZmResult<()> {
        critical::with(|cs| {
            match self.state.borrow_ref_mut(cs).task_mut(id) {
                Some(task) => task.events |= events,
                None => warn!("set_event on stale {}", id),
            }
        });
        Ok(())
    }

    /// Withdraw pending events from a task. Safe to call from interrupt
    /// context.
    ///
    /// A stale handle is ignored.
    pub fn clear_event(&self, id: TaskId, events: Events) -> ZmResult<()> {
        critical::with(|cs| {
            match self.state.borrow_ref_mut(cs).task_mut(id) {
                Some(task) => task.events &= !events,
                None => warn!("clear_event on stale {}", id),
            }
        });
        Ok(())
    }

    /// Events currently pending on a task, `None` for a stale handle
    pub fn pending_events(&self, id: TaskId) -> Option<Events> {
        critical::with(|cs| {
            self.state
                .borrow_ref(cs)
                .tasks
                .iter()
                .find(|task| task.id == id)
                .map(|task| task.events)
        })
    }

    /// Task whose handler is running, `None` outside of a dispatch
    pub fn current_task(&self) -> Option<TaskId> {
        critical::with(|cs| self.state.borrow_ref(cs).current)
    }

    /// Number of registered tasks, the callback timer task included
    pub fn task_count(&self) -> usize {
        critical::with(|cs| self.state.borrow_ref(cs).tasks.len())
    }

    /// Install the hook run by a scheduling pass that finds nothing to do.
    pub fn set_idle_hook(&self, hook: Option<fn()>) {
        critical::with(|cs| self.state.borrow_ref_mut(cs).idle_hook = hook);
    }

    /// Check that no registered task has pending events
    pub fn is_idle(&self) -> bool {
        critical::with(|cs| {
            self.state
                .borrow_ref(cs)
                .tasks
                .iter()
                .all(|task| task.events.is_empty())
        })
    }

    /// Run one scheduling pass.
    ///
    /// Dispatches the earliest-registered task with pending events: its mask
    /// is snapshotted and cleared atomically, the handler runs with the
    /// snapshot, and the events it returns are merged back. Events posted
    /// while the handler runs accumulate and are never lost. With no task
    /// ready, the idle hook runs instead.
    ///
    /// Returns `true` if a task was dispatched.
    pub fn schedule_once(&self) -> bool {
        let ready = critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let task = state.tasks.iter_mut().find(|task| !task.events.is_empty())?;
            let events = core::mem::replace(&mut task.events, Events::NONE);
            let dispatch = (task.id, task.handler, events);
            state.current = Some(dispatch.0);
            Some(dispatch)
        });

        let Some((id, handler, events)) = ready else {
            let hook = critical::with(|cs| self.state.borrow_ref(cs).idle_hook);
            if let Some(hook) = hook {
                hook();
            }
            return false;
        };

        trace!("dispatch {} {}", id, events);
        let unserviced = handler(self, events);

        critical::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            state.current = None;
            // The handler may have unregistered itself.
            if let Some(task) = state.task_mut(id) {
                task.events |= unserviced;
            }
        });
        true
    }
}
