//! Interrupt-mask and exclusive-monitor based mutual exclusion.
//!
//! No blocking `Mutex` type lives here: the scheduler is the only thing
//! allowed to put a thread on a wait queue, and it does so by holding a
//! [`spinlock::SpinLock`] around its own state — see `sched::scheduler`.

pub mod spinlock;

pub use spinlock::SpinLock;
