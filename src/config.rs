//! Compile-time knobs for the thread pool, stack layout and tick cadence.
//!
//! Grouped here as associated consts rather than threaded through call sites
//! as magic numbers, mirroring how the reference kernel keeps its `#define`s
//! next to the module that owns them.

use core::cell::UnsafeCell;

/// Number of user-creatable thread descriptors. Main and idle come on top.
pub const MAX_THREADS: usize = 4;

/// Total descriptor pool size: user threads plus the main and idle reservations.
pub const POOL_CAPACITY: usize = MAX_THREADS + 2;

/// Default stack size handed to callers that don't size their own stack.
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Hardware-saved portion of the initial exception frame: xPSR, PC, LR, R12, R3-R0.
pub const FRAME_HW_WORDS: usize = 8;
/// Software-saved portion: R11-R4 plus the `EXC_RETURN` sentinel.
pub const FRAME_SW_WORDS: usize = 9;

pub const FRAME_HW_BYTES: usize = FRAME_HW_WORDS * core::mem::size_of::<u32>();
pub const FRAME_SW_BYTES: usize = FRAME_SW_WORDS * core::mem::size_of::<u32>();
pub const FRAME_TOTAL_BYTES: usize = FRAME_HW_BYTES + FRAME_SW_BYTES;

/// Idle thread stack: just enough for the initial frame plus a safety margin,
/// since idle never calls anything deeper than its own busy loop.
pub const IDLE_STACK_SIZE: usize = FRAME_TOTAL_BYTES + 128;

/// Smallest stack `thread_create` will accept: the initial frame must fit,
/// with room left over for the entry function's own frame.
pub const MIN_STACK_BYTES: usize = FRAME_TOTAL_BYTES + 64;

/// `xPSR` thumb-state bit that must be set in every synthesized frame.
pub const XPSR_THUMB_BIT: u32 = 0x0100_0000;

/// `EXC_RETURN` value selecting "thread mode, process stack, no FP state".
pub const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// Long initial `SysTick` reload so the system has a generous slice before
/// the first tick, configured by `scheduler_init`.
pub const TICK_RELOAD_INITIAL: u32 = (1 << 24) - 1;

/// Runtime round-robin slice reloaded after the first tick fires.
pub const TICK_RELOAD_RUNTIME: u32 = (1 << 16) - 1;

/// Register words written into a freshly synthesized frame when
/// `debug-frame-sentinels` is enabled, to make an uninitialized-register bug
/// visible under a debugger instead of silently reading as zero.
#[cfg(feature = "debug-frame-sentinels")]
pub mod sentinel {
    pub const R0: u32 = 0xFF00;
    pub const R1: u32 = 0xFF01;
    pub const R2: u32 = 0xFF02;
    pub const R3: u32 = 0xFF03;
    pub const R12: u32 = 0xFF0C;
    pub const R4: u32 = 0xFF04;
    pub const R5: u32 = 0xFF05;
    pub const R6: u32 = 0xFF06;
    pub const R7: u32 = 0xFF07;
    pub const R8: u32 = 0xFF08;
    pub const R9: u32 = 0xFF09;
    pub const R10: u32 = 0xFF0A;
    pub const R11: u32 = 0xFF0B;
}

/// An 8-byte-aligned, statically-reserved thread stack of `N` bytes.
///
/// Stacks are never heap-allocated; every thread's backing storage is a
/// `Stack` placed in `.bss` by the [`thread_stack`](crate::thread_stack) macro.
#[repr(align(8))]
pub struct Stack<const N: usize>(UnsafeCell<[u8; N]>);

// Shared only via the pointer handed to `thread_create`; the kernel never
// reads or writes the bytes itself once the initial frame is synthesized.
unsafe impl<const N: usize> Sync for Stack<N> {}

impl<const N: usize> Stack<N> {
    pub const fn new() -> Self {
        Stack(UnsafeCell::new([0u8; N]))
    }

    /// Pointer to the lowest address of the stack region.
    pub fn base_ptr(&self) -> *mut u8 {
        self.0.get() as *mut u8
    }

    pub const fn len(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for Stack<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Declares a statically-reserved, 8-byte-aligned thread stack.
///
/// Mirrors the reference kernel's `THREAD_STACK_STATIC` macro, replacing the
/// linker-section placement with an ordinary `static` of a newtype that
/// forces the alignment.
#[macro_export]
macro_rules! thread_stack {
    ($name:ident, $size:expr) => {
        static $name: $crate::config::Stack<{ $size }> = $crate::config::Stack::new();
    };
}
