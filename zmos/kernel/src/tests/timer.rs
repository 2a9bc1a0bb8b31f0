use core::sync::atomic::{AtomicU32, Ordering};

use zmos_core::{Events, ZmError, MAX_TIMEOUT};

use super::{kernel, run_until_idle};
use crate::{Kernel, TimerState, MAX_TIMERS};

static RELOAD_FIRES: AtomicU32 = AtomicU32::new(0);

fn counts_reloads(_kernel: &Kernel, events: Events) -> Events {
    if events.contains(Events::new(0x02)) {
        RELOAD_FIRES.fetch_add(1, Ordering::SeqCst);
    }
    Events::NONE
}

#[test]
fn reload_timer_fires_every_period() {
    let kernel = kernel();
    let a = kernel.register(counts_reloads).unwrap();
    kernel.start_reload(a, Events::new(0x02), 100).unwrap();

    for round in 1..=10 {
        kernel.tick_update(100);
        assert_eq!(kernel.current_timeout(a, Events::new(0x02)), 100);
        run_until_idle(&kernel);
        assert_eq!(RELOAD_FIRES.load(Ordering::SeqCst), round);
    }
    assert_eq!(kernel.reload_timeout(a, Events::new(0x02)), 100);
    assert_eq!(kernel.get_clock(), 1000);
}

static ONESHOT_FIRES: AtomicU32 = AtomicU32::new(0);

fn counts_oneshots(_kernel: &Kernel, events: Events) -> Events {
    ONESHOT_FIRES.fetch_add(events.iter().count() as u32, Ordering::SeqCst);
    Events::NONE
}

#[test]
fn oneshot_fires_once_and_is_removed() {
    let kernel = kernel();
    let a = kernel.register(counts_oneshots).unwrap();
    kernel.start_oneshot(a, Events::bit(5), 30).unwrap();

    kernel.tick_update(10);
    assert_eq!(kernel.current_timeout(a, Events::bit(5)), 20);
    assert!(kernel.is_idle());

    // Overshooting the deadline still fires exactly once.
    kernel.tick_update(45);
    assert_eq!(kernel.pending_events(a), Some(Events::bit(5)));
    assert_eq!(kernel.timer_slots_used(), 0);
    assert_eq!(kernel.timer_state(a, Events::bit(5)), None);

    kernel.tick_update(100);
    run_until_idle(&kernel);
    assert_eq!(ONESHOT_FIRES.load(Ordering::SeqCst), 1);
}

fn stopped_target(_kernel: &Kernel, events: Events) -> Events {
    assert!(events.is_empty(), "stopped timer fired");
    events
}

#[test]
fn stopped_timer_is_reclaimed_without_firing() {
    let kernel = kernel();
    let a = kernel.register(stopped_target).unwrap();
    kernel.start_reload(a, Events::bit(1), 5).unwrap();
    kernel.start_oneshot(a, Events::bit(2), 500).unwrap();

    assert!(kernel.stop(a, Events::bit(1)));
    assert!(!kernel.stop(a, Events::bit(1)));
    assert_eq!(kernel.timer_state(a, Events::bit(1)), Some(TimerState::Stopped));
    assert_eq!(kernel.timer_slots_used(), 2);
    assert_eq!(kernel.current_timeout(a, Events::bit(1)), 0);
    assert_eq!(kernel.next_lowest_timeout(), 500);

    kernel.tick_update(5);
    assert_eq!(kernel.timer_state(a, Events::bit(1)), None);
    assert_eq!(kernel.timer_slots_used(), 1);
    assert!(kernel.is_idle());
}

fn restarted(_kernel: &Kernel, events: Events) -> Events {
    events & Events::bit(30)
}

#[test]
fn restarting_a_pair_updates_in_place() {
    let kernel = kernel();
    let a = kernel.register(restarted).unwrap();

    kernel.start_reload(a, Events::bit(3), 50).unwrap();
    kernel.tick_update(20);
    kernel.start_reload(a, Events::bit(3), 80).unwrap();
    assert_eq!(kernel.timer_slots_used(), 1);
    assert_eq!(kernel.current_timeout(a, Events::bit(3)), 80);
    assert_eq!(kernel.reload_timeout(a, Events::bit(3)), 80);

    // One-shot restart drops the reload.
    kernel.start_oneshot(a, Events::bit(3), 15).unwrap();
    assert_eq!(kernel.timer_slots_used(), 1);
    assert_eq!(kernel.current_timeout(a, Events::bit(3)), 15);
    assert_eq!(kernel.reload_timeout(a, Events::bit(3)), 0);

    // A different mask is a different timer.
    kernel.start_oneshot(a, Events::new(0b1000 | 0b0001), 15).unwrap();
    assert_eq!(kernel.timer_slots_used(), 2);
}

fn deadline_owner(_kernel: &Kernel, events: Events) -> Events {
    events & Events::bit(29)
}

#[test]
fn next_lowest_timeout_tracks_running_timers() {
    let kernel = kernel();
    assert_eq!(kernel.next_lowest_timeout(), MAX_TIMEOUT);

    let a = kernel.register(deadline_owner).unwrap();
    kernel.start_oneshot(a, Events::bit(0), 300).unwrap();
    kernel.start_reload(a, Events::bit(1), 120).unwrap();
    kernel.start_oneshot(a, Events::bit(2), 700).unwrap();
    assert_eq!(kernel.next_lowest_timeout(), 120);

    kernel.tick_update(100);
    assert_eq!(kernel.next_lowest_timeout(), 20);

    kernel.tick_update(20);
    // Reloaded to 120, the 300 one-shot now has 180 left.
    assert_eq!(kernel.next_lowest_timeout(), 120);

    kernel.stop(a, Events::bit(1));
    assert_eq!(kernel.next_lowest_timeout(), 180);
}

fn validated(_kernel: &Kernel, events: Events) -> Events {
    events & Events::bit(28)
}

#[test]
fn invalid_starts_are_rejected() {
    let kernel = kernel();
    let a = kernel.register(validated).unwrap();

    assert_eq!(kernel.start_oneshot(a, Events::NONE, 10), Err(ZmError::InvalidParam));
    assert_eq!(kernel.start_reload(a, Events::NONE, 10), Err(ZmError::InvalidParam));

    kernel.unregister(Some(a));
    assert_eq!(kernel.start_oneshot(a, Events::bit(0), 10), Err(ZmError::InvalidTask));
    assert_eq!(kernel.timer_slots_used(), 0);
}

fn orphan_owner(_kernel: &Kernel, events: Events) -> Events {
    events & Events::bit(27)
}

#[test]
fn timers_of_unregistered_tasks_are_dropped() {
    let kernel = kernel();
    let a = kernel.register(orphan_owner).unwrap();
    kernel.start_reload(a, Events::bit(0), 10).unwrap();
    kernel.start_oneshot(a, Events::bit(1), 50).unwrap();

    kernel.unregister(Some(a));
    assert_eq!(kernel.timer_slots_used(), 2);

    // Still counting down, so the entry survives this pass.
    kernel.tick_update(5);
    assert_eq!(kernel.timer_slots_used(), 2);

    kernel.tick_update(5);
    assert_eq!(kernel.timer_slots_used(), 1);
    kernel.tick_update(50);
    assert_eq!(kernel.timer_slots_used(), 0);
    assert!(kernel.is_idle());
}

fn crowded(_kernel: &Kernel, events: Events) -> Events {
    events & Events::bit(26)
}

#[test]
fn full_timer_list_reclaims_stopped_entries() {
    let kernel = kernel();
    let a = kernel.register(crowded).unwrap();

    for n in 0..MAX_TIMERS {
        kernel
            .start_oneshot(a, Events::new(n as zmos_core::EventBits + 1), 100)
            .unwrap();
    }
    assert_eq!(
        kernel.start_oneshot(a, Events::new(MAX_TIMERS as zmos_core::EventBits + 1), 100),
        Err(ZmError::TableFull)
    );

    kernel.stop(a, Events::new(1));
    kernel
        .start_oneshot(a, Events::new(MAX_TIMERS as zmos_core::EventBits + 1), 100)
        .unwrap();
    assert_eq!(kernel.timer_slots_used(), MAX_TIMERS);
}

#[test]
fn clock_wraps_around() {
    let kernel = kernel();
    kernel.tick_update(u32::MAX - 1);
    kernel.tick_update(3);
    assert_eq!(kernel.get_clock(), 1);
}

fn zero_delay(_kernel: &Kernel, events: Events) -> Events {
    events & Events::bit(25)
}

#[test]
fn zero_tick_timer_fires_on_next_pass() {
    let kernel = kernel();
    let a = kernel.register(zero_delay).unwrap();
    kernel.start_oneshot(a, Events::bit(4), 0).unwrap();
    assert_eq!(kernel.next_lowest_timeout(), 0);

    kernel.tick_update(1);
    assert_eq!(kernel.pending_events(a), Some(Events::bit(4)));
    assert_eq!(kernel.timer_slots_used(), 0);
}
