//! Lock-free scheduler phase tracking for post-mortem debugging.
//!
//! Single-core analogue of the reference kernel's per-CPU `sched_diag`
//! array: one atomic cell recording the last phase the scheduler entered.
//! Readable from a debugger (or a panic handler) without taking any lock,
//! which is the entire point — it exists to diagnose the scheduler when
//! `sched_lock` itself is suspected of being stuck.

use core::sync::atomic::{AtomicU8, Ordering};

pub const PHASE_IDLE: u8 = 0;
pub const PHASE_TICK: u8 = 1;
pub const PHASE_SCHEDULE: u8 = 2;
pub const PHASE_SWITCH_REQUESTED: u8 = 3;
pub const PHASE_SWITCHING: u8 = 4;
pub const PHASE_THREAD_CREATE: u8 = 5;
pub const PHASE_THREAD_JOIN_BLOCK: u8 = 6;
pub const PHASE_THREAD_END: u8 = 7;

static PHASE: AtomicU8 = AtomicU8::new(PHASE_IDLE);

pub fn set(phase: u8) {
    PHASE.store(phase, Ordering::Relaxed);
}

pub fn get() -> u8 {
    PHASE.load(Ordering::Relaxed)
}

pub fn name(phase: u8) -> &'static str {
    match phase {
        PHASE_IDLE => "idle",
        PHASE_TICK => "tick",
        PHASE_SCHEDULE => "schedule",
        PHASE_SWITCH_REQUESTED => "switch_requested",
        PHASE_SWITCHING => "switching",
        PHASE_THREAD_CREATE => "thread_create",
        PHASE_THREAD_JOIN_BLOCK => "thread_join_block",
        PHASE_THREAD_END => "thread_end",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        set(PHASE_TICK);
        assert_eq!(get(), PHASE_TICK);
        assert_eq!(name(get()), "tick");
        set(PHASE_IDLE);
    }
}
