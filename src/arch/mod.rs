//! Processor-specific services the portable core is built against.
//!
//! Everything in `list`, `sync`, `task` and `sched` is written against the
//! [`Arch`] trait instead of calling `cortex_m`/inline assembly directly, so
//! the pool/ready-queue/wait-queue bookkeeping can be exercised under
//! `cargo test` on the host with [`mock::MockArch`] standing in for real
//! silicon. Production builds select [`cortex_m_backend::CortexM`].

use core::sync::atomic::AtomicU32;

// Pulls in `cortex_m`/naked ARM assembly, neither of which has anything to
// assemble against on the host `cargo test` runs on — kept out of test
// builds entirely rather than merely unused, since the `PendSV` body is
// literal ARM mnemonics that a host assembler will happily reject.
#[cfg(not(test))]
pub mod cortex_m_backend;
#[cfg(test)]
pub mod mock;

#[cfg(not(test))]
pub type SysArch = cortex_m_backend::CortexM;
#[cfg(test)]
pub type SysArch = mock::MockArch;

/// Interrupt masking, the exclusive-monitor spin primitive, and the
/// deferred context-switch request this crate needs from its host processor.
pub trait Arch {
    /// Opaque previous-interrupt-mask snapshot, as returned by `irq_disable_store`.
    type Mask: Copy;

    fn irq_disable();
    fn irq_enable();
    fn irq_disable_store() -> Self::Mask;
    fn irq_restore(mask: Self::Mask);

    /// One exclusive-monitor acquire attempt (`UNLOCKED` -> `LOCKED`).
    /// Returns `true` on success; callers retry on failure.
    fn try_acquire(word: &AtomicU32) -> bool;
    fn release(word: &AtomicU32);

    /// Suspend the core until the next event (`wfe`).
    fn wfe();
    /// Signal an event to a core suspended in `wfe` (`sev`).
    fn sev();
    /// Data memory barrier.
    fn dmb();
    /// Data synchronization barrier.
    fn dsb();
    /// Instruction synchronization barrier.
    fn isb();

    /// Request the deferred context switch (assert the pend-handler's pending bit).
    fn request_context_switch();

    /// One-time periodic-timer bring-up: long initial reload, tick interrupt enabled.
    fn configure_tick_timer();
    /// Switch the periodic timer to its short round-robin slice. Called once,
    /// after the first tick has fired.
    fn reload_tick_short();
}
