//! Spinlocks
//!
//! A spinlock masks interrupts on the calling CPU through the port and then
//! contends an atomic flag, so it excludes both the interrupt handlers of the
//! local CPU and every other CPU. Critical sections must be short.
use core::{fmt, mem::ManuallyDrop, ops};
use spin::mutex::{SpinMutex, SpinMutexGuard};

use crate::{IrqKey, Port};

#[cfg(debug_assertions)]
use core::sync::atomic::{AtomicUsize, Ordering};

/// The owner tag of an unlocked spinlock.
#[cfg(debug_assertions)]
const OWNER_NONE: usize = 0;

/// The owner tag of a spinlock held by an interrupt handler. Interrupt
/// handlers are not checked for recursion.
#[cfg(debug_assertions)]
const OWNER_ISR: usize = usize::MAX;

/// A spinlock protecting a value of type `T`.
pub struct SpinLock<T> {
    inner: SpinMutex<T>,
    /// The CPU holding the lock (plus one), used to detect recursive
    /// acquisition.
    #[cfg(debug_assertions)]
    owner: AtomicUsize,
}

impl<T> SpinLock<T> {
    pub const fn new(x: T) -> Self {
        Self {
            inner: SpinMutex::new(x),
            #[cfg(debug_assertions)]
            owner: AtomicUsize::new(OWNER_NONE),
        }
    }

    /// Mask interrupts and acquire the lock.
    ///
    /// Acquiring a lock already held by the calling CPU is a fatal error
    /// (detected in debug builds only).
    #[inline]
    pub fn lock<'a, P: Port>(&'a self, port: &'a P) -> SpinLockGuard<'a, P, T> {
        let key = port.irq_lock();
        // Safety: `key` was just returned by `irq_lock`
        unsafe { self.lock_with_key(port, key) }
    }

    /// Acquire the lock with interrupts already masked. The guard restores
    /// `key` on release.
    ///
    /// # Safety
    ///
    /// Interrupts must be masked, and `key` must be the key of the
    /// outstanding `irq_lock` call of the current execution context.
    pub(crate) unsafe fn lock_with_key<'a, P: Port>(
        &'a self,
        port: &'a P,
        key: IrqKey,
    ) -> SpinLockGuard<'a, P, T> {
        self.check_recursion(port);
        let guard = self.inner.lock();
        self.set_owner(port);
        SpinLockGuard {
            lock: self,
            port,
            key,
            guard: ManuallyDrop::new(guard),
        }
    }

    /// Get a flag indicating whether the lock is held by anyone.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }

    #[cfg(debug_assertions)]
    fn owner_tag<P: Port>(port: &P) -> usize {
        if port.is_in_isr() {
            OWNER_ISR
        } else {
            port.cpu_id() + 1
        }
    }

    #[inline]
    fn check_recursion<P: Port>(&self, port: &P) {
        #[cfg(debug_assertions)]
        {
            let tag = Self::owner_tag(port);
            if tag != OWNER_ISR && self.owner.load(Ordering::Relaxed) == tag {
                log::error!("spinlock acquired recursively on CPU {}", tag - 1);
                port.system_fault(crate::FatalError::SpinlockRecursion);
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = port;
    }

    #[inline]
    fn set_owner<P: Port>(&self, port: &P) {
        #[cfg(debug_assertions)]
        self.owner.store(Self::owner_tag(port), Ordering::Relaxed);
        #[cfg(not(debug_assertions))]
        let _ = port;
    }

    #[inline]
    fn clear_owner(&self) {
        #[cfg(debug_assertions)]
        self.owner.store(OWNER_NONE, Ordering::Relaxed);
    }
}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// RAII guard of a [`SpinLock`]. Releasing it releases the lock and then
/// restores the interrupt state, also on unwinding.
pub struct SpinLockGuard<'a, P: Port, T> {
    lock: &'a SpinLock<T>,
    port: &'a P,
    key: IrqKey,
    guard: ManuallyDrop<SpinMutexGuard<'a, T>>,
}

impl<'a, P: Port, T> SpinLockGuard<'a, P, T> {
    /// Get the interrupt state from before the lock was acquired.
    #[inline]
    pub fn irq_key(&self) -> IrqKey {
        self.key
    }

    #[inline]
    pub fn port(&self) -> &'a P {
        self.port
    }

    /// Release the lock, leaving interrupts masked. Returns the key that
    /// restores them.
    pub(crate) fn unlock_keep_irq(self) -> IrqKey {
        let mut this = ManuallyDrop::new(self);
        this.lock.clear_owner();
        // Safety: `this.guard` is not used again, and `this` is not dropped
        unsafe { ManuallyDrop::drop(&mut this.guard) };
        this.key
    }

    /// Forget the guard, leaving the lock held and interrupts masked.
    fn leak(self) -> IrqKey {
        let this = ManuallyDrop::new(self);
        this.key
    }
}

impl<P: Port, T> Drop for SpinLockGuard<'_, P, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.clear_owner();
        // Safety: `self.guard` is not used again
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        // Safety: `self.key` is the key of the `irq_lock` call that preceded
        //         the acquisition
        unsafe { self.port.irq_unlock(self.key) };
    }
}

impl<P: Port, T> ops::Deref for SpinLockGuard<'_, P, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<P: Port, T> ops::DerefMut for SpinLockGuard<'_, P, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

impl<P: Port, T: fmt::Debug> fmt::Debug for SpinLockGuard<'_, P, T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("SpinLockGuard").field(&**self).finish()
    }
}

/// A spinlock without protected data, for code outside the kernel that needs
/// a critical section of its own. [`RawSpinLock::lock`] hands out a
/// [`SpinKey`] that must be passed back to [`RawSpinLock::unlock`].
#[derive(Debug)]
pub struct RawSpinLock {
    inner: SpinLock<()>,
}

/// Proof of holding a [`RawSpinLock`]. Carries the interrupt state to
/// restore.
#[derive(Debug)]
#[must_use = "the lock stays held until the key is passed to `RawSpinLock::unlock`"]
pub struct SpinKey {
    key: IrqKey,
    /// The address of the lock the key belongs to
    #[cfg(debug_assertions)]
    lock: usize,
}

impl RawSpinLock {
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(()),
        }
    }

    /// Mask interrupts and acquire the lock.
    pub fn lock<P: Port>(&self, port: &P) -> SpinKey {
        let key = self.inner.lock(port).leak();
        SpinKey {
            key,
            #[cfg(debug_assertions)]
            lock: self as *const Self as usize,
        }
    }

    /// Release the lock and restore the interrupt state saved in `key`.
    pub fn unlock<P: Port>(&self, port: &P, key: SpinKey) {
        #[cfg(debug_assertions)]
        debug_assert_eq!(
            key.lock, self as *const Self as usize,
            "the key belongs to another lock"
        );
        self.inner.clear_owner();
        // Safety: `key` was issued by `lock` of this lock and is consumed
        //         here, so the lock is held by the caller
        unsafe {
            self.inner.inner.force_unlock();
            port.irq_unlock(key.key);
        }
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}
