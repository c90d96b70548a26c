use crate::irq::{IrqGuard, Interrupts};
use crate::raw_spin::{RawSpin, RawSpinGuard};
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};

/// A value protected by a [`RawSpin`].
pub struct SpinLock<T> {
    raw: RawSpin,
    inner: UnsafeCell<T>,
}

// Safety: mutual exclusion; only T: Send may cross threads.
unsafe impl<T: Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(inner: T) -> Self {
        Self {
            raw: RawSpin::new(),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Try once; returns immediately.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        if self.raw.try_acquire() {
            Some(SpinLockGuard {
                lock: self,
                _raw: RawSpinGuard::adopt(&self.raw),
            })
        } else {
            None
        }
    }

    #[inline]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        SpinLockGuard {
            lock: self,
            _raw: self.raw.lock(),
        }
    }

    /// Disables interrupts, then takes the lock.
    ///
    /// The guard releases the lock first and restores the previous interrupt
    /// state afterwards.
    #[inline]
    pub fn lock_irq<'a, I: Interrupts + ?Sized>(&'a self, irq: &'a I) -> IrqSpinLockGuard<'a, T, I> {
        let irq = IrqGuard::new(irq);
        IrqSpinLockGuard {
            guard: self.lock(),
            irq,
        }
    }

    #[inline]
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut g = self.lock();
        f(&mut g)
    }

    /// Mutable access when you have `&mut self` (no contention possible).
    #[inline]
    pub const fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
}

impl<T: Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
    _raw: RawSpinGuard<'a>,
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: the raw lock is held for the guard's lifetime.
        unsafe { &*self.lock.inner.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the raw lock is held for the guard's lifetime.
        unsafe { &mut *self.lock.inner.get() }
    }
}

/// A [`SpinLockGuard`] taken with interrupts disabled.
pub struct IrqSpinLockGuard<'a, T, I: Interrupts + ?Sized> {
    // Field order is drop order: unlock before re-enabling interrupts.
    guard: SpinLockGuard<'a, T>,
    irq: IrqGuard<'a, I>,
}

impl<'a, T, I: Interrupts + ?Sized> IrqSpinLockGuard<'a, T, I> {
    /// Splits off the spin guard, keeping interrupts disabled in the
    /// returned [`IrqGuard`].
    pub fn into_parts(self) -> (SpinLockGuard<'a, T>, IrqGuard<'a, I>) {
        (self.guard, self.irq)
    }
}

impl<T, I: Interrupts + ?Sized> Deref for IrqSpinLockGuard<'_, T, I> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, I: Interrupts + ?Sized> DerefMut for IrqSpinLockGuard<'_, T, I> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
