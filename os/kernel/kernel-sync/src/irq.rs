//! Interrupt masking.
//!
//! On the MIPS target interrupts are masked through the `IE` bit of the
//! coprocessor 0 `Status` register. The kernel core does not touch the
//! register itself; the platform hands it an [`Interrupts`] implementation.

use alloc::sync::Arc;

/// Interrupt enable state saved by [`Interrupts::disable`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct InterruptState {
    enabled: bool,
}

impl InterruptState {
    #[must_use]
    pub const fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Whether interrupts were enabled when the state was captured.
    #[must_use]
    pub const fn was_enabled(self) -> bool {
        self.enabled
    }
}

/// Access to the current CPU's interrupt enable flag.
pub trait Interrupts {
    /// Masks interrupts and returns the state they had before.
    fn disable(&self) -> InterruptState;

    /// Restores a state previously returned by [`disable`](Self::disable).
    fn restore(&self, state: InterruptState);

    fn are_enabled(&self) -> bool;
}

impl<T: Interrupts + ?Sized> Interrupts for &T {
    fn disable(&self) -> InterruptState {
        (**self).disable()
    }

    fn restore(&self, state: InterruptState) {
        (**self).restore(state);
    }

    fn are_enabled(&self) -> bool {
        (**self).are_enabled()
    }
}

impl<T: Interrupts + ?Sized> Interrupts for Arc<T> {
    fn disable(&self) -> InterruptState {
        (**self).disable()
    }

    fn restore(&self, state: InterruptState) {
        (**self).restore(state);
    }

    fn are_enabled(&self) -> bool {
        (**self).are_enabled()
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Guards nest: an inner guard saves "disabled" and therefore leaves
/// interrupts masked when it is dropped. Drop them in reverse creation order.
///
/// # Examples
///
/// ```no_run
/// # fn demo(irq: &impl kernel_sync::Interrupts) {
/// use kernel_sync::IrqGuard;
///
/// {
///     let _g = IrqGuard::new(irq); // interrupts disabled here
///     // critical section
/// }
/// // previous state restored
/// # }
/// ```
#[must_use = "dropping the guard restores interrupts immediately"]
pub struct IrqGuard<'a, I: Interrupts + ?Sized> {
    irq: &'a I,
    saved: InterruptState,
}

impl<'a, I: Interrupts + ?Sized> IrqGuard<'a, I> {
    #[inline]
    pub fn new(irq: &'a I) -> Self {
        let saved = irq.disable();
        Self { irq, saved }
    }

    /// The state that will be restored on drop.
    #[inline]
    pub const fn saved(&self) -> InterruptState {
        self.saved
    }
}

impl<I: Interrupts + ?Sized> Drop for IrqGuard<'_, I> {
    fn drop(&mut self) {
        self.irq.restore(self.saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Flag(Cell<bool>);

    impl Interrupts for Flag {
        fn disable(&self) -> InterruptState {
            InterruptState::new(self.0.replace(false))
        }

        fn restore(&self, state: InterruptState) {
            self.0.set(state.was_enabled());
        }

        fn are_enabled(&self) -> bool {
            self.0.get()
        }
    }

    #[test]
    fn nested_guards_restore_outer_state() {
        let irq = Flag(Cell::new(true));
        {
            let outer = IrqGuard::new(&irq);
            assert!(outer.saved().was_enabled());
            {
                let inner = IrqGuard::new(&irq);
                assert!(!inner.saved().was_enabled());
            }
            assert!(!irq.are_enabled());
        }
        assert!(irq.are_enabled());
    }

    #[test]
    fn guard_keeps_disabled_state_disabled() {
        let irq = Flag(Cell::new(false));
        drop(IrqGuard::new(&irq));
        assert!(!irq.are_enabled());
    }
}
