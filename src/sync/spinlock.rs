//! Four spin-lock flavors built on one exclusive-monitor core.
//!
//! All four share the same acquire primitive ([`Arch::try_acquire`]); they
//! differ only in whether a failed attempt sleeps (`wfe`) or busy-spins, and
//! in whether interrupts are masked around the critical section:
//!
//! | method            | failed-attempt action | IRQ masking                  |
//! |-------------------|------------------------|------------------------------|
//! | [`lock`]          | `wfe`                  | none                         |
//! | [`lock_busy`]      | busy-spin              | none                         |
//! | [`lock_irq`]       | busy-spin              | disable / unconditional enable |
//! | [`lock_irq_store`] | busy-spin              | disable+store / restore, nestable |
//!
//! [`lock_irq`] and [`lock_irq_store`] both use the busy-spin acquire, never
//! `wfe`: interrupts are already masked by the time the exclusive-monitor
//! loop runs, so a core parked in `wfe` here would only wake on an
//! unrelated event (or never, on a single-core system with nothing left to
//! raise one) instead of on the unlock it's actually waiting for.
//!
//! [`lock`]: SpinLock::lock
//! [`lock_busy`]: SpinLock::lock_busy
//! [`lock_irq`]: SpinLock::lock_irq
//! [`lock_irq_store`]: SpinLock::lock_irq_store

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::AtomicU32;

use crate::arch::{Arch, SysArch};

const UNLOCKED: u32 = 0;

/// A mutex whose critical sections are assumed short enough to spin through
/// rather than block on, with no kernel-level wait queue of its own.
pub struct SpinLock<T: ?Sized> {
    word: AtomicU32,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through a guard obtained by
// successfully acquiring `word`, which provides the necessary exclusion.
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        SpinLock { word: AtomicU32::new(UNLOCKED), data: UnsafeCell::new(value) }
    }
}

impl<T: ?Sized> SpinLock<T> {
    fn acquire_sleep(&self) {
        while !SysArch::try_acquire(&self.word) {
            SysArch::wfe();
        }
        SysArch::dmb();
    }

    fn acquire_busy(&self) {
        while !SysArch::try_acquire(&self.word) {
            core::hint::spin_loop();
        }
        SysArch::dmb();
    }

    /// Release for the sleeping (`wfe`) acquire flavor: emits `sev` so a
    /// core parked in [`acquire_sleep`](Self::acquire_sleep) wakes up.
    fn release_and_wake(&self) {
        SysArch::dmb();
        SysArch::release(&self.word);
        SysArch::sev();
    }

    /// Release for the busy-spin acquire flavors (`lock_busy`, `lock_irq`):
    /// no `sev`, since nothing on a single-core system is parked in `wfe`
    /// waiting on this exact word — a spurious event would only cost some
    /// unrelated `wfe` caller a wakeup.
    fn release_quiet(&self) {
        SysArch::dmb();
        SysArch::release(&self.word);
    }

    /// Acquire, sleeping (`wfe`) between failed attempts. Never call this
    /// with interrupts masked: nothing would ever wake the core back up.
    pub fn lock(&self) -> SpinGuard<'_, T> {
        self.acquire_sleep();
        SpinGuard { lock: self }
    }

    /// Acquire by busy-spinning. Safe to call from a context that cannot
    /// sleep (interrupt handlers, or interrupts already masked).
    pub fn lock_busy(&self) -> BusyGuard<'_, T> {
        self.acquire_busy();
        BusyGuard { lock: self }
    }

    /// Disable interrupts, then busy-acquire. Not nestable: an inner call
    /// unconditionally re-enables interrupts on drop even if an outer call
    /// is still holding a different lock with interrupts meant to stay
    /// masked. Prefer [`lock_irq_store`](Self::lock_irq_store) when nesting
    /// is possible.
    pub fn lock_irq(&self) -> IrqGuard<'_, T> {
        SysArch::irq_disable();
        self.acquire_busy();
        IrqGuard { lock: self }
    }

    /// Disable interrupts (recording the prior mask), then busy-acquire.
    /// Nestable: the guard restores exactly the mask observed at its own
    /// call site, so an inner lock's drop doesn't re-enable interrupts an
    /// outer lock is still relying on being masked.
    pub fn lock_irq_store(&self) -> IrqStoreGuard<'_, T> {
        let mask = SysArch::irq_disable_store();
        self.acquire_busy();
        IrqStoreGuard { lock: self, mask }
    }

    /// Single non-blocking attempt; `None` if already held.
    pub fn try_lock(&self) -> Option<SpinGuard<'_, T>> {
        if SysArch::try_acquire(&self.word) {
            SysArch::dmb();
            Some(SpinGuard { lock: self })
        } else {
            None
        }
    }
}

macro_rules! guard {
    ($name:ident $(, $extra:ident : $extra_ty:ty)?) => {
        pub struct $name<'a, T: ?Sized> {
            lock: &'a SpinLock<T>,
            $($extra: $extra_ty,)?
        }

        impl<T: ?Sized> Deref for $name<'_, T> {
            type Target = T;
            fn deref(&self) -> &T {
                unsafe { &*self.lock.data.get() }
            }
        }

        impl<T: ?Sized> DerefMut for $name<'_, T> {
            fn deref_mut(&mut self) -> &mut T {
                unsafe { &mut *self.lock.data.get() }
            }
        }
    };
}

guard!(SpinGuard);
guard!(BusyGuard);
guard!(IrqGuard);
guard!(IrqStoreGuard, mask: <SysArch as Arch>::Mask);

impl<T: ?Sized> Drop for SpinGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_and_wake();
    }
}

impl<T: ?Sized> Drop for BusyGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_quiet();
    }
}

impl<T: ?Sized> Drop for IrqGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_quiet();
        SysArch::irq_enable();
    }
}

impl<T: ?Sized> Drop for IrqStoreGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_quiet();
        SysArch::irq_restore(self.mask);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_drop_releases_for_next_lock() {
        let lock = SpinLock::new(0u32);
        {
            let mut g = lock.lock();
            *g += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(0u32);
        let g = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(g);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn lock_busy_unlock_does_not_sev() {
        use crate::arch::mock;
        let lock = SpinLock::new(0u32);
        let before = mock::sev_count();
        drop(lock.lock_busy());
        assert_eq!(mock::sev_count(), before);
    }

    #[test]
    fn lock_irq_unlock_does_not_sev() {
        use crate::arch::mock;
        let lock = SpinLock::new(0u32);
        let before = mock::sev_count();
        drop(lock.lock_irq());
        assert_eq!(mock::sev_count(), before);
    }

    #[test]
    fn lock_irq_store_unlock_does_not_sev() {
        use crate::arch::mock;
        let lock = SpinLock::new(0u32);
        let before = mock::sev_count();
        drop(lock.lock_irq_store());
        assert_eq!(mock::sev_count(), before);
    }

    #[test]
    fn lock_sleeping_unlock_does_sev() {
        use crate::arch::mock;
        let lock = SpinLock::new(0u32);
        let before = mock::sev_count();
        drop(lock.lock());
        assert_eq!(mock::sev_count(), before + 1);
    }

    #[test]
    fn lock_irq_disables_and_restores_interrupts() {
        use crate::arch::mock;
        let lock = SpinLock::new(0u32);
        assert!(!mock::irqs_disabled());
        {
            let _g = lock.lock_irq();
            assert!(mock::irqs_disabled());
        }
        assert!(!mock::irqs_disabled());
    }

    #[test]
    fn lock_irq_store_nests_across_two_locks() {
        use crate::arch::mock;
        let outer = SpinLock::new(0u32);
        let inner = SpinLock::new(0u32);
        assert!(!mock::irqs_disabled());
        let og = outer.lock_irq_store();
        assert!(mock::irqs_disabled());
        {
            let ig = inner.lock_irq_store();
            assert!(mock::irqs_disabled());
            drop(ig);
        }
        assert!(mock::irqs_disabled());
        drop(og);
        assert!(!mock::irqs_disabled());
    }
}
