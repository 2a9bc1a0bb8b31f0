//! Hosting ZMOS on Linux/Unix.
//!
//! The kernel and the system loop are board-agnostic; this crate provides
//! the two board pieces a desktop process needs. [`HostClock`] counts ticks
//! off the monotonic clock and [`HostSleep`] turns the low-power hooks into
//! a thread sleep bounded by the next timer deadline. The [`sim`] module
//! swaps both for a simulated counter so timing can be tested without
//! waiting on the wall clock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;
use thiserror::Error;
use zmos_core::ZmError;
use zmos_system::{ClockSource, LowPowerBsp, System};

pub mod clock;
pub mod sim;
pub mod sleep;

pub use clock::HostClock;
pub use sim::{SimClock, SimSleep};
pub use sleep::HostSleep;

/// Errors raised while bringing up the host port
#[derive(Debug, Error)]
pub enum HostError {
    #[error("tick rate of {0} Hz is outside 1 Hz to 1 GHz")]
    InvalidTickRate(u32),
    #[error("kernel error: {0}")]
    Kernel(#[from] ZmError),
    #[error("failed to install the shutdown handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type HostResult<T> = Result<T, HostError>;

/// Install a Ctrl-C handler and return the flag it raises.
///
/// Only one handler can be installed per process.
pub fn shutdown_flag() -> HostResult<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        raised.store(true, Ordering::SeqCst);
    })?;
    Ok(flag)
}

/// Start the system and run its loop until `stop` is raised.
///
/// Returns the number of passes that dispatched a task.
pub fn run_until<C, L>(system: &mut System<'_, C, L>, stop: &AtomicBool) -> u64
where
    C: ClockSource,
    L: LowPowerBsp,
{
    system.start();
    let mut dispatched = 0;
    while !stop.load(Ordering::Relaxed) {
        if system.run_once() {
            dispatched += 1;
        }
    }
    info!(
        "system loop stopped at tick {} after {} dispatches",
        system.kernel().get_clock(),
        dispatched
    );
    dispatched
}

/// Allocate a zeroed memory pool that lives for the rest of the process.
///
/// Hosted stand-in for the static array a device links its heap into.
pub fn leak_pool(bytes: usize) -> &'static mut [u8] {
    Box::leak(vec![0u8; bytes].into_boxed_slice())
}
