//! Blinky on Linux
//!
//! A task toggles a simulated LED every half second off a reload timer,
//! and a callback timer logs a heartbeat with heap usage every two seconds.
//! Between deadlines the loop sleeps the thread. Stop with Ctrl-C.
//!
//! ```text
//! RUST_LOG=debug cargo run -p zmos-posix --example blinky
//! ```

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use log::{info, warn};
use zmos_core::{Events, ZmError};
use zmos_kernel::{kernel, Kernel};
use zmos_mem::LockedHeap;
use zmos_posix::{leak_pool, run_until, shutdown_flag, HostClock, HostResult, HostSleep};
use zmos_system::{low_power_events, System, SystemConfig};

const TICK_RATE_HZ: u32 = 1000;
const BLINK_PERIOD: u32 = 500;
const HEARTBEAT_PERIOD: u32 = 2000;

const TOGGLE: Events = Events::bit(0);

static HEAP: LockedHeap = LockedHeap::new();
static LED_ON: AtomicBool = AtomicBool::new(false);
static TOGGLES: AtomicU32 = AtomicU32::new(0);

fn led_task(_kernel: &Kernel, events: Events) -> Events {
    if events.contains(TOGGLE) {
        let on = !LED_ON.fetch_xor(true, Ordering::Relaxed);
        TOGGLES.fetch_add(1, Ordering::Relaxed);
        info!("LED {}", if on { "on" } else { "off" });
    }
    Events::NONE
}

/// Formats the heartbeat line into a pool buffer.
fn heartbeat(kernel: &Kernel, beat: usize) {
    let mut line = String::new();
    let _ = write!(
        line,
        "heartbeat {} at tick {}: {} toggles",
        beat,
        kernel.get_clock(),
        TOGGLES.load(Ordering::Relaxed)
    );

    let logged = HEAP.with(|heap| {
        let buf = heap.try_malloc(line.len())?;
        heap.payload_mut(buf)[..line.len()].copy_from_slice(line.as_bytes());
        let text = String::from_utf8_lossy(&heap.payload(buf)[..line.len()]).into_owned();
        let used = heap.used();
        heap.free(buf);
        Ok::<_, ZmError>((text, used, heap.total()))
    });

    match logged {
        Some(Ok((text, used, total))) => info!("{} (heap {}/{} bytes)", text, used, total),
        Some(Err(err)) => warn!("heartbeat {}: {}", beat, err),
        None => warn!("heartbeat {}: heap unavailable", beat),
    }

    // Re-arm with the next beat number as argument.
    if kernel
        .cbtimer_start_oneshot(HEARTBEAT_PERIOD, beat + 1, heartbeat)
        .is_err()
    {
        warn!("heartbeat {}: no callback slot left", beat + 1);
    }
}

fn main() -> HostResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    HEAP.init(leak_pool(4096));

    let clock = HostClock::new(TICK_RATE_HZ)?;
    let bsp = HostSleep::new(clock.tick_period(), Duration::from_millis(100));
    let config = SystemConfig::new().low_power(true);
    let mut system = System::new(kernel(), low_power_events(), clock, bsp, config);

    let led = kernel().register(led_task)?;
    kernel().start_reload(led, TOGGLE, BLINK_PERIOD)?;
    kernel().cbtimer_start_oneshot(HEARTBEAT_PERIOD, 1, heartbeat)?;

    let stop = shutdown_flag()?;
    info!("blinky running at {} Hz, Ctrl-C to stop", TICK_RATE_HZ);
    run_until(&mut system, &stop);

    info!(
        "{} toggles, heap high-water mark {} bytes",
        TOGGLES.load(Ordering::Relaxed),
        HEAP.stats().max_used
    );
    Ok(())
}
