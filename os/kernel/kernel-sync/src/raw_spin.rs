use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, Ordering};

/// Busy-waiting lock over a single flag.
///
/// This is the kernel's spinlock: it has no owner, is not re-entrant and
/// never suspends the caller. Hold it only across code that is bounded in
/// time and does not block. Pair it with an [`IrqGuard`](crate::IrqGuard)
/// so an interrupt handler cannot spin on a lock its own CPU holds.
pub struct RawSpin {
    held: AtomicBool,
}

impl Default for RawSpin {
    fn default() -> Self {
        Self::new()
    }
}

impl RawSpin {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            held: AtomicBool::new(false),
        }
    }

    /// Forces the lock to the free state.
    ///
    /// Initialization only; resetting a lock somebody holds breaks their
    /// critical section.
    #[inline]
    pub fn reset(&self) {
        self.held.store(false, Ordering::Release);
    }

    /// Spins until the lock is free, then marks it held.
    #[inline]
    pub fn acquire(&self) {
        while self.held.swap(true, Ordering::Acquire) {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
        }
    }

    #[inline]
    pub fn try_acquire(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    /// Marks the lock free.
    ///
    /// # Safety
    /// The caller must be the party that acquired the lock.
    #[inline]
    pub unsafe fn release(&self) {
        self.held.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Relaxed)
    }

    /// Acquires the lock and returns a guard that releases it on drop.
    #[inline]
    pub fn lock(&self) -> RawSpinGuard<'_> {
        self.acquire();
        RawSpinGuard { spin: self }
    }
}

/// Holds a [`RawSpin`] until dropped.
#[must_use = "dropping the guard releases the spinlock immediately"]
pub struct RawSpinGuard<'a> {
    spin: &'a RawSpin,
}

impl<'a> RawSpinGuard<'a> {
    /// Wraps a lock the caller has already acquired.
    pub(crate) const fn adopt(spin: &'a RawSpin) -> Self {
        Self { spin }
    }
}

impl Drop for RawSpinGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard exists only while its spinlock is held.
        unsafe { self.spin.release() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_cycle() {
        let spin = RawSpin::new();
        spin.acquire();
        assert!(spin.is_held());
        assert!(!spin.try_acquire());
        unsafe { spin.release() };
        assert!(!spin.is_held());
        assert!(spin.try_acquire());
    }

    #[test]
    fn reset_frees_the_lock() {
        let spin = RawSpin::new();
        spin.acquire();
        spin.reset();
        assert!(!spin.is_held());
    }

    #[test]
    fn guard_releases_on_drop() {
        let spin = RawSpin::new();
        {
            let _g = spin.lock();
            assert!(spin.is_held());
        }
        assert!(!spin.is_held());
    }
}
