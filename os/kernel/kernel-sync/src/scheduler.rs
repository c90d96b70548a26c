//! The slice of the thread scheduler the synchronization primitives need.

use alloc::sync::Arc;
use core::fmt;

/// Identifier of a kernel thread.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ThreadId(u32);

impl ThreadId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", self.0)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block and wake primitives of the thread scheduler.
pub trait Scheduler {
    /// The thread executing the caller.
    fn current_thread(&self) -> ThreadId;

    /// Suspends the calling thread until another thread calls
    /// [`wake`](Self::wake) for it.
    ///
    /// A wake that arrives between the moment the thread was registered in a
    /// sleep queue and the call to `block_current` is not lost: the call then
    /// returns without suspending.
    fn block_current(&self);

    /// Makes a blocked thread runnable again.
    fn wake(&self, thread: ThreadId);
}

impl<T: Scheduler + ?Sized> Scheduler for &T {
    fn current_thread(&self) -> ThreadId {
        (**self).current_thread()
    }

    fn block_current(&self) {
        (**self).block_current();
    }

    fn wake(&self, thread: ThreadId) {
        (**self).wake(thread);
    }
}

impl<T: Scheduler + ?Sized> Scheduler for Arc<T> {
    fn current_thread(&self) -> ThreadId {
        (**self).current_thread()
    }

    fn block_current(&self) {
        (**self).block_current();
    }

    fn wake(&self, thread: ThreadId) {
        (**self).wake(thread);
    }
}
