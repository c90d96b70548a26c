use crate::irq::{Interrupts, IrqGuard};
use crate::lock::Lock;
use crate::scheduler::Scheduler;
use crate::sleepq::{ResourceId, SleepQueue};

/// A condition variable.
///
/// It carries no state of its own; its address is the sleep queue key its
/// waiters are registered under. All operations require the caller to hold
/// the associated [`Lock`].
pub struct Condition {
    // Keeps the type non-zero-sized so every condition has its own address.
    _identity: u8,
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition {
    #[must_use]
    pub const fn new() -> Self {
        Self { _identity: 0 }
    }

    /// Initializes the condition. There is nothing to initialize.
    pub const fn init(&self) {}

    /// Releases `lock`, sleeps until signalled and re-acquires `lock`.
    ///
    /// The caller is registered as a waiter before the lock is released, so
    /// a signal issued by the next holder of the lock always finds it.
    ///
    /// # Panics
    /// Panics if the calling thread does not hold `lock`.
    pub fn wait<P: Scheduler + Interrupts>(&self, lock: &Lock, sleepq: &SleepQueue<P>) {
        let platform = sleepq.platform();
        let _irq = IrqGuard::new(platform);
        let me = platform.current_thread();
        assert!(lock.is_held_by(me), "condition wait without holding the lock");

        sleepq.add(self.id());
        lock.release(sleepq);
        platform.block_current();
        lock.acquire(sleepq);
    }

    /// Wakes at most one waiter. Does not release `lock`.
    ///
    /// # Panics
    /// Panics if the calling thread does not hold `lock`.
    pub fn signal<P: Scheduler + Interrupts>(&self, lock: &Lock, sleepq: &SleepQueue<P>) {
        self.assert_holder(lock, sleepq);
        sleepq.wake(self.id());
    }

    /// Wakes every waiter. Does not release `lock`.
    ///
    /// # Panics
    /// Panics if the calling thread does not hold `lock`.
    pub fn broadcast<P: Scheduler + Interrupts>(&self, lock: &Lock, sleepq: &SleepQueue<P>) {
        self.assert_holder(lock, sleepq);
        sleepq.wake_all(self.id());
    }

    fn id(&self) -> ResourceId {
        ResourceId::of(self)
    }

    fn assert_holder<P: Scheduler + Interrupts>(&self, lock: &Lock, sleepq: &SleepQueue<P>) {
        let me = sleepq.platform().current_thread();
        assert!(
            lock.is_held_by(me),
            "condition {:?} signalled without holding the lock",
            self.id()
        );
    }
}
