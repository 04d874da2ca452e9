//! Host stand-in for [`super::Arch`], used by every `cargo test` in this
//! crate. There is no real interrupt controller or exclusive monitor on the
//! host, so this backend models the two properties the portable code
//! actually depends on:
//!
//! * a nestable "IRQs disabled" depth counter, so [`MockArch::irq_restore`]
//!   only actually re-enables once the outermost disable unwinds, and the
//!   mask returned by `irq_disable_store` records what the *caller* observed;
//! * a single-threaded exclusive-monitor emulation via [`Cell`], since tests
//!   run on one OS thread and never genuinely race each other.
//!
//! [`MockArch::request_context_switch`] does not defer to a real `PendSV`:
//! there is no exception controller to pend it on, so it calls
//! [`crate::sched::scheduler::complete_switch`] synchronously, making a
//! requested switch visible to the test immediately instead of on the next
//! interrupt return.

use core::cell::Cell;
use core::sync::atomic::{AtomicU32, Ordering};

use super::Arch;
use crate::sched::scheduler;

thread_local! {
    static IRQ_DEPTH: Cell<u32> = Cell::new(0);
    static SEV_COUNT: Cell<u32> = Cell::new(0);
}

pub struct MockArch;

impl Arch for MockArch {
    type Mask = u32;

    fn irq_disable() {
        IRQ_DEPTH.with(|d| d.set(d.get() + 1));
    }

    fn irq_enable() {
        IRQ_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }

    fn irq_disable_store() -> u32 {
        let prev = IRQ_DEPTH.with(|d| d.get());
        IRQ_DEPTH.with(|d| d.set(prev + 1));
        prev
    }

    fn irq_restore(mask: u32) {
        IRQ_DEPTH.with(|d| d.set(mask));
    }

    fn try_acquire(word: &AtomicU32) -> bool {
        // No real contention on a single test thread; compare-exchange is
        // enough to keep `debug_assert!` style double-lock bugs honest.
        word.compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed).is_ok()
    }

    fn release(word: &AtomicU32) {
        word.store(0, Ordering::Release);
    }

    fn wfe() {}

    fn sev() {
        SEV_COUNT.with(|c| c.set(c.get() + 1));
    }

    fn dmb() {}

    fn dsb() {}

    fn isb() {}

    fn request_context_switch() {
        scheduler::complete_switch();
    }

    fn configure_tick_timer() {
        // No real timer on the host; tests drive ticks by calling
        // `scheduler::tick_handler()` directly.
    }

    fn reload_tick_short() {}
}

#[cfg(test)]
pub(crate) fn irqs_disabled() -> bool {
    IRQ_DEPTH.with(|d| d.get() > 0)
}

#[cfg(test)]
pub(crate) fn sev_count() -> u32 {
    SEV_COUNT.with(|c| c.get())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_enable_is_not_nestable_past_zero() {
        assert!(!irqs_disabled());
        MockArch::irq_enable();
        assert!(!irqs_disabled());
    }

    #[test]
    fn store_restore_round_trips_nested_masks() {
        assert!(!irqs_disabled());
        let outer = MockArch::irq_disable_store();
        assert!(irqs_disabled());
        let inner = MockArch::irq_disable_store();
        assert!(irqs_disabled());
        MockArch::irq_restore(inner);
        assert!(irqs_disabled());
        MockArch::irq_restore(outer);
        assert!(!irqs_disabled());
    }

    #[test]
    fn try_acquire_then_release_round_trips() {
        let word = AtomicU32::new(0);
        assert!(MockArch::try_acquire(&word));
        assert!(!MockArch::try_acquire(&word));
        MockArch::release(&word);
        assert!(MockArch::try_acquire(&word));
    }
}
