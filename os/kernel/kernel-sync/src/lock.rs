use crate::irq::{Interrupts, IrqGuard};
use crate::raw_spin::{RawSpin, RawSpinGuard};
use crate::scheduler::{Scheduler, ThreadId};
use crate::sleepq::{ResourceId, SleepQueue};
use core::cell::UnsafeCell;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LockError {
    #[error("lock is held and cannot be reset")]
    Held,
}

struct LockState {
    held: bool,
    owner: Option<ThreadId>,
}

/// A sleeping mutual exclusion lock.
///
/// Contended acquirers are put on the [`SleepQueue`] under the lock's own
/// identity and re-check the state every time they are woken. The lock is
/// not re-entrant, and only the holder may release it.
pub struct Lock {
    guard: RawSpin,
    state: UnsafeCell<LockState>,
}

// Safety: `state` is only accessed while `guard` is held.
unsafe impl Sync for Lock {}
unsafe impl Send for Lock {}

impl Default for Lock {
    fn default() -> Self {
        Self::new()
    }
}

impl Lock {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            guard: RawSpin::new(),
            state: UnsafeCell::new(LockState {
                held: false,
                owner: None,
            }),
        }
    }

    /// Puts the lock into the free state.
    ///
    /// # Errors
    /// Returns [`LockError::Held`] if somebody holds the lock.
    pub fn reset(&self) -> Result<(), LockError> {
        let mut spin = self.guard.lock();
        let state = self.state(&mut spin);
        if state.held {
            return Err(LockError::Held);
        }
        state.owner = None;
        Ok(())
    }

    /// Acquires the lock, sleeping while another thread holds it.
    ///
    /// # Panics
    /// Panics if the calling thread already holds the lock.
    pub fn acquire<P: Scheduler + Interrupts>(&self, sleepq: &SleepQueue<P>) {
        let platform = sleepq.platform();
        let _irq = IrqGuard::new(platform);
        let me = platform.current_thread();

        let mut spin = self.guard.lock();
        loop {
            let state = self.state(&mut spin);
            if !state.held {
                state.held = true;
                state.owner = Some(me);
                return;
            }

            assert_ne!(state.owner, Some(me), "lock acquired recursively by {me}");
            sleepq.sleep_on(ResourceId::of(self), spin);
            spin = self.guard.lock();
        }
    }

    /// Releases the lock and wakes the longest-waiting acquirer.
    ///
    /// # Panics
    /// Panics if the calling thread does not hold the lock.
    pub fn release<P: Scheduler + Interrupts>(&self, sleepq: &SleepQueue<P>) {
        let platform = sleepq.platform();
        let _irq = IrqGuard::new(platform);
        let me = platform.current_thread();

        let mut spin = self.guard.lock();
        let state = self.state(&mut spin);
        assert!(
            state.held && state.owner == Some(me),
            "lock released by {me}, which does not hold it"
        );
        state.held = false;
        state.owner = None;
        sleepq.wake(ResourceId::of(self));
    }

    /// Whether `thread` currently holds the lock.
    pub fn is_held_by(&self, thread: ThreadId) -> bool {
        let mut spin = self.guard.lock();
        let state = self.state(&mut spin);
        state.held && state.owner == Some(thread)
    }

    pub fn is_locked(&self) -> bool {
        let mut spin = self.guard.lock();
        self.state(&mut spin).held
    }

    /// Access to the state, witnessed by the held spin guard.
    #[allow(clippy::mut_from_ref)]
    fn state<'g>(&'g self, _held: &'g mut RawSpinGuard<'_>) -> &'g mut LockState {
        // SAFETY: the caller holds `self.guard`, and the exclusive borrow of
        // the guard keeps the returned reference unique.
        unsafe { &mut *self.state.get() }
    }
}
