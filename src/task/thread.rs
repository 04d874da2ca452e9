//! Thread descriptors, the static pool, initial-frame synthesis, and the
//! `create`/`join`/`exit` public surface.

use core::cell::Cell;
use core::mem::MaybeUninit;
use core::ptr::NonNull;

use bitflags::bitflags;

use crate::arch::{Arch, SysArch};
use crate::config;
use crate::error::{JoinOutcome, KernelError};
use crate::list::{Linked, List, ListLink};
use crate::sched::scheduler;

bitflags! {
    /// Every state gets its own bit — the reference kernel's `STARTING` and
    /// `READY` shared a bit value, which made `sched_ready_enqueue` look like
    /// it was marking a thread `WAITING`. See DESIGN.md.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadStatus: u32 {
        const NONE     = 0;
        const STARTING = 1 << 0;
        const READY    = 1 << 1;
        const ACTIVE   = 1 << 2;
        const PENDING  = 1 << 3;
        const WAITING  = 1 << 4;
        const ENDED    = 1 << 5;
    }
}

/// A thread's entry point. Plain `extern "C" fn()` — no argument passing,
/// no return value; a thread that returns falls into [`cleanup_trampoline`].
pub type ThreadEntry = extern "C" fn();

/// Thread descriptor. `#[repr(C)]` with `stack_ptr` as the first field: the
/// naked `PendSV` body addresses a descriptor's saved stack pointer through
/// the descriptor's own address, with no offset computation.
#[repr(C)]
pub(crate) struct Tcb {
    stack_ptr: Cell<*mut u32>,
    status: Cell<ThreadStatus>,
    id: u8,
    link: ListLink<Tcb>,
    wait_queue: List<Tcb>,
}

// Every field is accessed only through `&Tcb` while `SCHED` (or, for the
// current thread, nothing but the thread itself) holds exclusive logical
// ownership; there is only one core.
unsafe impl Sync for Tcb {}

impl Tcb {
    const fn new(id: u8) -> Self {
        Tcb {
            stack_ptr: Cell::new(core::ptr::null_mut()),
            status: Cell::new(ThreadStatus::NONE),
            id,
            link: ListLink::new(),
            wait_queue: List::new(),
        }
    }

    pub(crate) fn status(&self) -> ThreadStatus {
        self.status.get()
    }

    pub(crate) fn set_status(&self, status: ThreadStatus) {
        self.status.set(status);
    }

    pub(crate) fn set_stack_ptr(&self, sp: *mut u32) {
        self.stack_ptr.set(sp);
    }

    pub(crate) fn wait_queue(&self) -> &List<Tcb> {
        &self.wait_queue
    }

    pub(crate) fn id(&self) -> u8 {
        self.id
    }
}

unsafe impl Linked for Tcb {
    fn link(&self) -> &ListLink<Tcb> {
        &self.link
    }
}

const fn build_pool() -> [Tcb; config::POOL_CAPACITY] {
    let mut slots: [MaybeUninit<Tcb>; config::POOL_CAPACITY] =
        unsafe { MaybeUninit::uninit().assume_init() };
    let mut i = 0;
    while i < config::POOL_CAPACITY {
        slots[i] = MaybeUninit::new(Tcb::new(i as u8));
        i += 1;
    }
    // SAFETY: every slot was just initialized above; `MaybeUninit<Tcb>` and
    // `Tcb` share layout, so this is a same-size reinterpretation, not a
    // narrowing copy.
    unsafe { core::mem::transmute_copy(&slots) }
}

/// Slot 0 is the idle descriptor, slot 1 is main, the rest seed the free pool.
static POOL: [Tcb; config::POOL_CAPACITY] = build_pool();

crate::thread_stack!(IDLE_STACK, config::IDLE_STACK_SIZE);

extern "C" fn idle_entry() {
    loop {
        SysArch::wfe();
    }
}

/// Every freshly created thread's initial link-register points here, so a
/// thread function returning normally falls straight into cleanup instead of
/// faulting on a garbage return address. Runs in thread context with IRQs
/// enabled: (1) `thread_end` sets ENDED, (2) drains the wait queue and
/// requests the switch away, (3) this function's own trailing loop is the
/// safety net in case control is ever (erroneously) returned to it.
pub(crate) extern "C" fn cleanup_trampoline() -> ! {
    let current = scheduler::current_thread();
    scheduler::thread_end(current.raw());
    loop {
        SysArch::wfe();
    }
}

/// Builds the initial exception frame (software-saved region followed by the
/// hardware-saved region, low address to high) and returns the resulting
/// stack pointer, ready to be handed to [`Tcb::set_stack_ptr`].
///
/// # Safety
/// `stack_top` must be the exclusive, properly-sized top of a stack region
/// at least [`config::MIN_STACK_BYTES`] long that nothing else accesses.
unsafe fn synthesize_frame(stack_top: *mut u8, entry: ThreadEntry) -> *mut u32 {
    let aligned_top = (stack_top as usize) & !0x7;
    let frame_base = aligned_top - config::FRAME_TOTAL_BYTES;
    let sp = frame_base as *mut u32;

    #[cfg(feature = "debug-frame-sentinels")]
    let sw_words: [u32; config::FRAME_SW_WORDS] = [
        config::sentinel::R4,
        config::sentinel::R5,
        config::sentinel::R6,
        config::sentinel::R7,
        config::sentinel::R8,
        config::sentinel::R9,
        config::sentinel::R10,
        config::sentinel::R11,
        config::EXC_RETURN_THREAD_PSP,
    ];
    #[cfg(not(feature = "debug-frame-sentinels"))]
    let sw_words: [u32; config::FRAME_SW_WORDS] =
        [0, 0, 0, 0, 0, 0, 0, 0, config::EXC_RETURN_THREAD_PSP];

    for (i, word) in sw_words.iter().enumerate() {
        unsafe { sp.add(i).write(*word) };
    }

    let hw_base = unsafe { sp.add(config::FRAME_SW_WORDS) };

    #[cfg(feature = "debug-frame-sentinels")]
    let hw_words: [u32; config::FRAME_HW_WORDS] = [
        config::sentinel::R0,
        config::sentinel::R1,
        config::sentinel::R2,
        config::sentinel::R3,
        config::sentinel::R12,
        cleanup_trampoline as usize as u32,
        entry as usize as u32,
        config::XPSR_THUMB_BIT,
    ];
    #[cfg(not(feature = "debug-frame-sentinels"))]
    let hw_words: [u32; config::FRAME_HW_WORDS] = [
        0,
        0,
        0,
        0,
        0,
        cleanup_trampoline as usize as u32,
        entry as usize as u32,
        config::XPSR_THUMB_BIT,
    ];

    for (i, word) in hw_words.iter().enumerate() {
        unsafe { hw_base.add(i).write(*word) };
    }

    sp
}

/// A handle to a thread descriptor. Cheap to copy; the descriptor it points
/// at outlives every handle (the pool is `'static`).
#[derive(Clone, Copy)]
pub struct ThreadHandle {
    tcb: NonNull<Tcb>,
}

// The pointee lives in the 'static pool and is only ever mutated under
// `SCHED`'s lock (or, for status reads used purely for diagnostics, via a
// single-word `Cell` load).
unsafe impl Send for ThreadHandle {}
unsafe impl Sync for ThreadHandle {}

impl PartialEq for ThreadHandle {
    fn eq(&self, other: &Self) -> bool {
        self.tcb == other.tcb
    }
}
impl Eq for ThreadHandle {}

impl ThreadHandle {
    pub(crate) fn from_raw(tcb: NonNull<Tcb>) -> Self {
        ThreadHandle { tcb }
    }

    /// The raw descriptor pointer, for scheduler-internal calls
    /// ([`cleanup_trampoline`]) that need to hand it back to [`scheduler`].
    pub(crate) fn raw(&self) -> NonNull<Tcb> {
        self.tcb
    }

    /// Stable diagnostic identifier (this descriptor's pool index).
    pub fn id(&self) -> u8 {
        unsafe { self.tcb.as_ref() }.id()
    }

    /// `thread_join`: blocks until this thread ends, or returns immediately
    /// if it already had (or never ran).
    pub fn join(&self) -> Result<JoinOutcome, KernelError> {
        scheduler::join(self.tcb)
    }
}

/// `thread_init`: populates the free pool, reserves the main and idle
/// descriptors, and hands both to the scheduler. Must be called exactly
/// once, before any tick or pend interrupt is enabled.
pub fn init() -> Result<(), KernelError> {
    let idle = NonNull::from(&POOL[0]);
    let main = NonNull::from(&POOL[1]);

    let idle_top = unsafe { IDLE_STACK.base_ptr().add(IDLE_STACK.len()) };
    let idle_sp = unsafe { synthesize_frame(idle_top, idle_entry) };
    unsafe { idle.as_ref() }.set_stack_ptr(idle_sp);

    unsafe { main.as_ref() }.set_status(ThreadStatus::ACTIVE);

    let free_nodes = (2..config::POOL_CAPACITY).map(|i| NonNull::from(&POOL[i]));
    scheduler::init(main, idle, free_nodes);
    Ok(())
}

/// `thread_create`: detaches a descriptor from the free pool, synthesizes its
/// initial frame over `[stack_base, stack_base + stack_len)`, and enqueues it
/// ready. `stack_base` must be non-null and `stack_len` at least
/// [`config::MIN_STACK_BYTES`], or this rejects with [`KernelError::BadArgument`].
pub fn create(
    entry: ThreadEntry,
    stack_base: *mut u8,
    stack_len: usize,
) -> Result<ThreadHandle, KernelError> {
    if stack_base.is_null() || stack_len < config::MIN_STACK_BYTES {
        return Err(KernelError::BadArgument);
    }
    let stack_top = unsafe { stack_base.add(stack_len) };
    scheduler::create_thread(|node| {
        let sp = unsafe { synthesize_frame(stack_top, entry) };
        unsafe { node.as_ref() }.set_stack_ptr(sp);
    })
}

/// `thread_join(target)`.
pub fn join(handle: &ThreadHandle) -> Result<JoinOutcome, KernelError> {
    handle.join()
}

/// `sched_current_thread_get`, exposed from the thread module's point of view.
pub fn current() -> ThreadHandle {
    scheduler::current_thread()
}

/// Serializes every test in this crate that touches the global thread
/// pool/scheduler singleton: there is exactly one `SCHED` and one `POOL` per
/// process, so tests that `reset_for_test()` and `init()` them cannot run
/// concurrently with each other.
#[cfg(test)]
pub(crate) fn test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Returns every descriptor to `NONE` and forgets the scheduler's pools.
/// Test-only counterpart to [`init`], which has no production reset path.
#[cfg(test)]
pub(crate) fn reset_for_test() {
    for tcb in POOL.iter() {
        tcb.status.set(ThreadStatus::NONE);
        tcb.stack_ptr.set(core::ptr::null_mut());
        tcb.wait_queue.clear();
    }
    scheduler::reset_for_test();
}
