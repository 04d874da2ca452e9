//! ARMv7-M (Cortex-M) implementation of [`Arch`](super::Arch).
//!
//! Confines inline assembly to three places, per the design notes: interrupt
//! mask get/set (delegated to `cortex_m::register::primask`), the spin-lock
//! exclusive-monitor core (`ldrex`/`strex` below), and the `PendSV` body
//! that performs the actual register-bank swap.

use core::sync::atomic::AtomicU32;

use cortex_m::peripheral::{SCB, SYST};
use cortex_m::register::primask;

use super::Arch;
use crate::config;
use crate::sched::scheduler;

pub struct CortexM;

impl Arch for CortexM {
    type Mask = u32;

    #[inline(always)]
    fn irq_disable() {
        cortex_m::interrupt::disable();
    }

    #[inline(always)]
    fn irq_enable() {
        unsafe { cortex_m::interrupt::enable() };
    }

    #[inline(always)]
    fn irq_disable_store() -> u32 {
        let mask = primask::read().is_active() as u32;
        cortex_m::interrupt::disable();
        mask
    }

    #[inline(always)]
    fn irq_restore(mask: u32) {
        if mask != 0 {
            unsafe { cortex_m::interrupt::enable() };
        }
    }

    #[inline(always)]
    fn try_acquire(word: &AtomicU32) -> bool {
        exclusive::try_acquire(word)
    }

    #[inline(always)]
    fn release(word: &AtomicU32) {
        word.store(0, core::sync::atomic::Ordering::Release);
    }

    #[inline(always)]
    fn wfe() {
        cortex_m::asm::wfe();
    }

    #[inline(always)]
    fn sev() {
        cortex_m::asm::sev();
    }

    #[inline(always)]
    fn dmb() {
        cortex_m::asm::dmb();
    }

    #[inline(always)]
    fn dsb() {
        cortex_m::asm::dsb();
    }

    #[inline(always)]
    fn isb() {
        cortex_m::asm::isb();
    }

    #[inline(always)]
    fn request_context_switch() {
        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn configure_tick_timer() {
        let mut peripherals = cortex_m::Peripherals::take()
            .expect("SysTick already configured, or cortex_m::Peripherals taken elsewhere");
        peripherals.SYST.set_clock_source(cortex_m::peripheral::syst::SystClkSource::Core);
        peripherals.SYST.set_reload(config::TICK_RELOAD_INITIAL);
        peripherals.SYST.clear_current();
        peripherals.SYST.enable_interrupt();
        peripherals.SYST.enable_counter();
    }

    fn reload_tick_short() {
        // SAFETY: SYST is a singleton peripheral; by the time the first tick
        // has fired `configure_tick_timer` has already run, and this only
        // ever runs with `sched_lock` held.
        unsafe {
            (*SYST::PTR).rvr.write(config::TICK_RELOAD_RUNTIME);
        }
    }
}

/// The `ldrex`/`strex` retry loop. Split out so the target-specific assembly
/// doesn't leak into the rest of the lock implementation.
#[cfg(target_arch = "arm")]
mod exclusive {
    use core::arch::asm;
    use core::sync::atomic::AtomicU32;

    const LOCKED: u32 = 1;

    pub fn try_acquire(word: &AtomicU32) -> bool {
        let ptr = word as *const AtomicU32 as *const u32 as *mut u32;
        let mut success: u32;
        unsafe {
            asm!(
                "ldrex {old}, [{ptr}]",
                "cmp {old}, {locked}",
                "beq 1f",
                "strex {res}, {locked}, [{ptr}]",
                "b 2f",
                "1:",
                "mov {res}, #1",
                "2:",
                ptr = in(reg) ptr,
                locked = in(reg) LOCKED,
                old = out(reg) _,
                res = out(reg) success,
                options(nostack),
            );
        }
        success == 0
    }
}

// Hosts without the exclusive monitor (doc builds, `cargo check` off-target)
// fall back to a plain compare-exchange; never selected when `cfg(test)`
// swaps in `MockArch` instead.
#[cfg(not(target_arch = "arm"))]
mod exclusive {
    use core::sync::atomic::{AtomicU32, Ordering};

    pub fn try_acquire(word: &AtomicU32) -> bool {
        word.compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed).is_ok()
    }
}

/// Installed into the vector table by the hosting application; vector-table
/// wiring is out of scope for this crate (§1), which only supplies the
/// `#[no_mangle]` symbol the application's startup code links against.
#[no_mangle]
pub extern "C" fn SysTick() {
    scheduler::tick_handler();
}

/// The deferred context switch. Contains nothing but the load/store sequence
/// that swaps the process-stack register bank between the outgoing and
/// incoming thread — no Rust prologue may run before the first register is
/// saved, hence `#[naked]`.
///
/// Bookkeeping (`current_thread := next_thread; next_thread := None`) is not
/// safe to do here directly (it takes `sched_lock`), so the asm calls
/// [`scheduler::complete_switch`] — but *before* the incoming thread's
/// register bank (and in particular its real `lr`/`EXC_RETURN`) is loaded,
/// not after: `bl` itself clobbers `lr` with its own return address per
/// AAPCS, so loading the incoming `lr` ahead of the call would have that
/// value immediately stomped, leaving `bx lr` branch back into this
/// function instead of returning to the incoming thread. Only `r0`-`r3`/
/// `r12`/`lr` are call-clobbered, and everything this asm still needs after
/// the call (the addresses of `NEXT_SP_SLOT` and the incoming stack pointer)
/// is reloaded from statics afterward rather than carried across the call in
/// a register.
#[unsafe(naked)]
#[no_mangle]
pub unsafe extern "C" fn PendSV() {
    core::arch::naked_asm!(
        "mrs r0, psp",
        "ldr r1, ={current_sp}",
        "ldr r1, [r1]",
        "stmdb r0!, {{r4-r11, r14}}",
        "str r0, [r1]",
        "bl {complete}",
        "ldr r2, ={next_sp}",
        "ldr r2, [r2]",
        "ldr r0, [r2]",
        "ldmia r0!, {{r4-r11, r14}}",
        "msr psp, r0",
        "bx lr",
        current_sp = sym scheduler::CURRENT_SP_SLOT,
        next_sp = sym scheduler::NEXT_SP_SLOT,
        complete = sym scheduler::complete_switch,
    );
}
