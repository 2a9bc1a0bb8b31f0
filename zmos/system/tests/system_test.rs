//! Main loop and low-power orchestration tests

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, Ordering};

use zmos_core::{Events, Ticks, MAX_TIMEOUT};
use zmos_kernel::{Kernel, TaskFn};
use zmos_system::{ClockSource, LowPowerBsp, LowPowerEvents, System, SystemConfig};

#[derive(Default)]
struct FakeClock(Cell<Ticks>);

impl FakeClock {
    fn starting_at(ticks: Ticks) -> Self {
        Self(Cell::new(ticks))
    }

    fn advance(&self, ticks: Ticks) {
        self.0.set(self.0.get().wrapping_add(ticks));
    }
}

impl ClockSource for FakeClock {
    fn clock_count(&self) -> Ticks {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hook {
    Before(Ticks),
    Enter,
    After,
}

/// Records the hooks and sleeps through the whole timeout.
struct FakeBsp<'a> {
    clock: &'a FakeClock,
    calls: Vec<Hook>,
    timeout: Ticks,
}

impl<'a> FakeBsp<'a> {
    fn new(clock: &'a FakeClock) -> Self {
        Self {
            clock,
            calls: Vec::new(),
            timeout: 0,
        }
    }

    fn sleeps(&self) -> usize {
        self.calls
            .iter()
            .filter(|hook| **hook == Hook::Enter)
            .count()
    }
}

impl LowPowerBsp for FakeBsp<'_> {
    fn before_sleep(&mut self, next_timeout: Ticks) {
        self.timeout = next_timeout;
        self.calls.push(Hook::Before(next_timeout));
    }

    fn enter_sleep(&mut self) {
        self.calls.push(Hook::Enter);
    }

    fn after_sleep(&mut self) {
        if self.timeout != MAX_TIMEOUT {
            self.clock.advance(self.timeout);
        }
        self.calls.push(Hook::After);
    }
}

const LOW_POWER: SystemConfig = SystemConfig::new().low_power(true);

static TICKED: AtomicU32 = AtomicU32::new(0);

fn ticked(_kernel: &Kernel, events: Events) -> Events {
    TICKED.fetch_add(events.iter().count() as u32, Ordering::SeqCst);
    Events::NONE
}

#[test]
fn hardware_ticks_drive_the_timer_list() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::default();
    let mut system = System::new(&kernel, &lpm, &clock, zmos_system::NoSleep, SystemConfig::new());

    let task = kernel.register(ticked).unwrap();
    kernel.start_reload(task, Events::bit(0), 10).unwrap();

    clock.advance(9);
    assert!(!system.run_once());
    assert_eq!(kernel.get_clock(), 9);

    // No new ticks, no timer pass.
    system.run_once();
    assert_eq!(kernel.current_timeout(task, Events::bit(0)), 1);

    clock.advance(1);
    assert_eq!(system.pending_ticks(), 1);
    assert!(system.run_once());
    assert_eq!(TICKED.load(Ordering::SeqCst), 1);
    assert_eq!(system.pending_ticks(), 0);
}

#[test]
fn counter_offset_at_bring_up_is_ignored() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::starting_at(5000);
    let mut system = System::new(&kernel, &lpm, &clock, zmos_system::NoSleep, SystemConfig::new());

    system.run_once();
    assert_eq!(kernel.get_clock(), 0);
    clock.advance(3);
    system.run_once();
    assert_eq!(kernel.get_clock(), 3);
}

#[test]
fn counter_wraparound_yields_the_true_delta() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::starting_at(u32::MAX - 4);
    let mut system = System::new(&kernel, &lpm, &clock, zmos_system::NoSleep, SystemConfig::new());

    clock.advance(10);
    assert_eq!(clock.clock_count(), 5);
    system.run_once();
    assert_eq!(kernel.get_clock(), 10);
}

#[test]
fn no_sleep_before_start() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::default();
    let mut system = System::new(&kernel, &lpm, &clock, FakeBsp::new(&clock), LOW_POWER);

    assert_eq!(lpm.raw(), 1 << 31);
    system.run_once();
    assert_eq!(system.bsp().sleeps(), 0);

    system.start();
    system.run_once();
    assert_eq!(
        system.bsp().calls,
        [Hook::Before(MAX_TIMEOUT), Hook::Enter, Hook::After]
    );
}

#[test]
fn low_power_disabled_never_sleeps() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::default();
    let mut system = System::new(&kernel, &lpm, &clock, FakeBsp::new(&clock), SystemConfig::new());
    system.start();

    for _ in 0..5 {
        system.run_once();
    }
    assert_eq!(system.bsp().sleeps(), 0);
}

#[test]
fn keep_awake_bits_block_sleep() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::default();
    let mut system = System::new(&kernel, &lpm, &clock, FakeBsp::new(&clock), LOW_POWER);
    system.start();

    lpm.set(4).unwrap();
    system.run_once();
    assert_eq!(system.bsp().sleeps(), 0);

    lpm.clear(4).unwrap();
    system.run_once();
    assert_eq!(system.bsp().sleeps(), 1);
}

fn always_busy(_kernel: &Kernel, events: Events) -> Events {
    events
}

#[test]
fn wait_idle_defers_sleep_while_tasks_are_ready() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::default();
    let mut system = System::new(&kernel, &lpm, &clock, FakeBsp::new(&clock), LOW_POWER);
    system.start();

    let busy = kernel.register(always_busy).unwrap();
    kernel.set_event(busy, Events::bit(2)).unwrap();
    system.run_once();
    system.run_once();
    assert_eq!(system.bsp().sleeps(), 0);

    kernel.clear_event(busy, Events::ALL).unwrap();
    system.run_once();
    assert_eq!(system.bsp().sleeps(), 1);
}

fn also_busy(_kernel: &Kernel, events: Events) -> Events {
    events | Events::bit(3)
}

#[test]
fn sleep_without_wait_idle_ignores_ready_tasks() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::default();
    let config = LOW_POWER.wait_idle(false);
    let mut system = System::new(&kernel, &lpm, &clock, FakeBsp::new(&clock), config);
    system.start();

    let busy = kernel.register(also_busy).unwrap();
    kernel.set_event(busy, Events::bit(3)).unwrap();
    system.run_once();
    assert_eq!(system.bsp().sleeps(), 1);
}

static WOKEN: AtomicU32 = AtomicU32::new(0);

fn woken(_kernel: &Kernel, _events: Events) -> Events {
    WOKEN.fetch_add(1, Ordering::SeqCst);
    Events::NONE
}

#[test]
fn sleep_lasts_until_the_next_deadline() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::default();
    let mut system = System::new(&kernel, &lpm, &clock, FakeBsp::new(&clock), LOW_POWER);

    let task = kernel.register(woken).unwrap();
    kernel.start_oneshot(task, Events::bit(0), 250).unwrap();
    kernel.start_oneshot(task, Events::bit(1), 40).unwrap();
    system.start();

    // Nothing ready: sleep through the 40-tick deadline.
    system.run_once();
    assert_eq!(system.bsp().calls[0], Hook::Before(40));
    assert_eq!(clock.clock_count(), 40);

    // Wake-up pass feeds the slept ticks and dispatches.
    assert!(system.run_once());
    assert_eq!(WOKEN.load(Ordering::SeqCst), 1);
    assert_eq!(kernel.next_lowest_timeout(), 210);
}

static BOOTED: AtomicU32 = AtomicU32::new(0);

fn boot_task(_kernel: &Kernel, _events: Events) -> Events {
    BOOTED.fetch_add(1, Ordering::SeqCst);
    Events::NONE
}

const BOOT_TASKS: [TaskFn; 1] = [boot_task];

#[test]
fn bring_up_registers_the_task_list() {
    let kernel = Kernel::new();
    let lpm = LowPowerEvents::new();
    let clock = FakeClock::default();
    let mut system = System::with_tasks(
        &kernel,
        &lpm,
        &clock,
        zmos_system::NoSleep,
        SystemConfig::new(),
        &BOOT_TASKS,
    )
    .unwrap();
    assert_eq!(kernel.task_count(), 2);

    let id = kernel.register(boot_task).unwrap();
    kernel.start_oneshot(id, Events::bit(0), 5).unwrap();
    clock.advance(5);
    assert!(system.run_once());
    assert_eq!(BOOTED.load(Ordering::SeqCst), 1);
    assert_eq!(lpm.raw(), 1 << 31);
}
