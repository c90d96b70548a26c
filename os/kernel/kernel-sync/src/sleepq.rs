use crate::irq::{Interrupts, IrqGuard};
use crate::scheduler::{Scheduler, ThreadId};
use crate::spin_lock::SpinLock;
use alloc::collections::VecDeque;
use core::fmt;

/// Identity of something threads can sleep on: the address of a lock, a
/// condition variable or a process control block.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ResourceId(usize);

impl ResourceId {
    /// The identity of `resource`, derived from its address.
    ///
    /// Distinct live objects only get distinct identities if they are not
    /// zero-sized.
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized>(resource: &T) -> Self {
        Self(core::ptr::from_ref(resource).cast::<u8>().addr())
    }
}

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({:#x})", self.0)
    }
}

#[derive(Copy, Clone, Debug)]
struct Sleeper {
    resource: ResourceId,
    thread: ThreadId,
}

/// Registry of threads blocked on a resource.
///
/// Waking one sleeper is first-in-first-out per resource. The queue owns the
/// platform whose scheduler suspends and resumes its sleepers, so every
/// blocking primitive of this crate takes the queue as its context.
pub struct SleepQueue<P> {
    platform: P,
    sleepers: SpinLock<VecDeque<Sleeper>>,
}

impl<P> SleepQueue<P>
where
    P: Scheduler + Interrupts,
{
    pub const fn new(platform: P) -> Self {
        Self {
            platform,
            sleepers: SpinLock::new(VecDeque::new()),
        }
    }

    #[inline]
    pub const fn platform(&self) -> &P {
        &self.platform
    }

    /// Registers the calling thread as sleeping on `resource`.
    ///
    /// The caller must block (or otherwise consume the wakeup) afterwards;
    /// see [`sleep_on`](Self::sleep_on) for the usual sequence.
    pub fn add(&self, resource: ResourceId) {
        let thread = self.platform.current_thread();
        self.sleepers
            .lock_irq(&self.platform)
            .push_back(Sleeper { resource, thread });
    }

    /// Wakes the longest-waiting sleeper on `resource`.
    ///
    /// Returns `false` if nobody was waiting.
    pub fn wake(&self, resource: ResourceId) -> bool {
        let woken = {
            let mut sleepers = self.sleepers.lock_irq(&self.platform);
            sleepers
                .iter()
                .position(|s| s.resource == resource)
                .and_then(|index| sleepers.remove(index))
        };

        match woken {
            Some(sleeper) => {
                self.platform.wake(sleeper.thread);
                true
            }
            None => false,
        }
    }

    /// Wakes every sleeper on `resource` and returns how many there were.
    pub fn wake_all(&self, resource: ResourceId) -> usize {
        let mut count = 0;
        let mut sleepers = self.sleepers.lock_irq(&self.platform);
        sleepers.retain(|s| {
            if s.resource == resource {
                self.platform.wake(s.thread);
                count += 1;
                false
            } else {
                true
            }
        });
        count
    }

    /// Number of threads currently registered on `resource`.
    pub fn sleepers_on(&self, resource: ResourceId) -> usize {
        self.sleepers
            .lock_irq(&self.platform)
            .iter()
            .filter(|s| s.resource == resource)
            .count()
    }

    /// Registers the calling thread on `resource`, drops `guard` and blocks.
    ///
    /// `guard` is whatever protects the condition the caller re-checks after
    /// waking, typically a spinlock guard. Interrupts stay disabled from the
    /// registration until the thread is suspended, and a wake issued after
    /// `guard` is dropped is delivered to this thread.
    pub fn sleep_on<G>(&self, resource: ResourceId, guard: G) {
        let _irq = IrqGuard::new(&self.platform);
        self.add(resource);
        drop(guard);
        self.platform.block_current();
    }
}
