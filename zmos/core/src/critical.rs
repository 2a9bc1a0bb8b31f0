//! Critical-section nesting counter
//!
//! Interrupts are masked on the 0 -> 1 transition of the counter and restored
//! on the 1 -> 0 transition, so regions may nest freely: a task helper that
//! enters a critical section can be called from code that already holds one.
//! An `exit` without a matching `enter` is ignored and the counter stays at
//! zero.
//!
//! The actual masking is delegated to the `critical-section` crate, so the
//! same counter works on a Cortex-M port, a RISC-V port, or on a host with the
//! `critical-section/std` implementation.
#![allow(unsafe_code)]

use core::cell::Cell;

use critical_section::{CriticalSection, Mutex, RestoreState};

/// Nesting counter guarding the interrupt-disabled region.
pub struct CriticalNest {
    depth: Mutex<Cell<u32>>,
    /// Restore token of the outermost acquisition
    saved: Mutex<Cell<RestoreState>>,
}

impl CriticalNest {
    pub const fn new() -> Self {
        Self {
            depth: Mutex::new(Cell::new(0)),
            saved: Mutex::new(Cell::new(RestoreState::invalid())),
        }
    }

    /// Enter the critical region, masking interrupts on first entry.
    pub fn enter(&self) {
        // SAFETY: the token is released below for a nested entry, or by the
        // `exit` that brings the depth back to zero.
        let restore = unsafe { critical_section::acquire() };
        // SAFETY: interrupts are masked for as long as `cs` is used.
        let cs = unsafe { CriticalSection::new() };

        let depth = self.depth.borrow(cs);
        if depth.get() == 0 {
            self.saved.borrow(cs).set(restore);
            depth.set(1);
        } else {
            depth.set(depth.get().saturating_add(1));
            // SAFETY: most recent acquisition, released in LIFO order. The
            // outer acquisition keeps interrupts masked.
            unsafe { critical_section::release(restore) };
        }
    }

    /// Leave the critical region, unmasking interrupts on the last exit.
    pub fn exit(&self) {
        // SAFETY: released before returning on every path.
        let inner = unsafe { critical_section::acquire() };
        // SAFETY: interrupts are masked for as long as `cs` is used.
        let cs = unsafe { CriticalSection::new() };

        let depth = self.depth.borrow(cs);
        match depth.get() {
            // Unmatched exit: clamp at zero.
            // SAFETY: `inner` is the token acquired at the top of this call
            // and nothing else was acquired since.
            0 => unsafe { critical_section::release(inner) },
            1 => {
                depth.set(0);
                let outer = self.saved.borrow(cs).replace(RestoreState::invalid());
                // SAFETY: `inner` was acquired last, `outer` by the matching
                // outermost `enter`.
                unsafe {
                    critical_section::release(inner);
                    critical_section::release(outer);
                }
            }
            n => {
                depth.set(n - 1);
                // SAFETY: most recent acquisition.
                unsafe { critical_section::release(inner) };
            }
        }
    }

    /// Current nesting depth as seen by the caller.
    pub fn depth(&self) -> u32 {
        critical_section::with(|cs| self.depth.borrow(cs).get())
    }

    /// Enter and return a guard that exits when dropped.
    pub fn lock(&self) -> CriticalGuard<'_> {
        self.enter();
        CriticalGuard { nest: self }
    }

    /// Run `f` inside the critical region.
    ///
    /// The token handed to `f` unlocks `critical_section::Mutex` contents.
    pub fn with<R>(&self, f: impl FnOnce(CriticalSection<'_>) -> R) -> R {
        let _guard = self.lock();
        // SAFETY: the guard keeps interrupts masked until `f` returns.
        let cs = unsafe { CriticalSection::new() };
        f(cs)
    }
}

impl Default for CriticalNest {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard returned by [`CriticalNest::lock`].
pub struct CriticalGuard<'a> {
    nest: &'a CriticalNest,
}

impl Drop for CriticalGuard<'_> {
    fn drop(&mut self) {
        self.nest.exit();
    }
}

/// The process-wide nesting counter.
pub static CRITICAL: CriticalNest = CriticalNest::new();

/// Enter the process-wide critical section
#[inline]
pub fn enter() {
    CRITICAL.enter();
}

/// Exit the process-wide critical section
#[inline]
pub fn exit() {
    CRITICAL.exit();
}

/// Run `f` inside the process-wide critical section
#[inline]
pub fn with<R>(f: impl FnOnce(CriticalSection<'_>) -> R) -> R {
    CRITICAL.with(f)
}
