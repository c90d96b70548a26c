//! Kernel threads as host threads.
//!
//! Every host thread that touches the scheduler gets a [`ThreadId`] on
//! first use; threads created through [`SimMachine`](crate::SimMachine) are
//! registered before they start so they can be woken right away.

use kernel_sync::{InterruptState, Interrupts, Scheduler, ThreadId};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

static NEXT_ID: AtomicU32 = AtomicU32::new(1);
static REGISTRY: Mutex<BTreeMap<ThreadId, Arc<Parker>>> = Mutex::new(BTreeMap::new());

/// Locks `mutex`, ignoring poisoning by panicking kernel threads.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single wake token.
#[derive(Default)]
struct Parker {
    token: Mutex<bool>,
    cvar: Condvar,
}

impl Parker {
    fn park(&self) {
        let mut token = lock(&self.token);
        while !*token {
            token = self.cvar.wait(token).unwrap_or_else(PoisonError::into_inner);
        }
        *token = false;
    }

    fn unpark(&self) {
        *lock(&self.token) = true;
        self.cvar.notify_one();
    }
}

struct Registration {
    id: ThreadId,
    parker: Arc<Parker>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock(&REGISTRY).remove(&self.id);
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Registration>> = const { RefCell::new(None) };
    static IRQ_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Registers a thread that has not started yet.
pub(crate) fn reserve() -> ThreadId {
    let id = ThreadId::new(NEXT_ID.fetch_add(1, Ordering::Relaxed));
    lock(&REGISTRY).insert(id, Arc::new(Parker::default()));
    id
}

/// Binds the calling host thread to a reserved id.
pub(crate) fn adopt(id: ThreadId) {
    let parker = lock(&REGISTRY)
        .get(&id)
        .cloned()
        .unwrap_or_default();
    CURRENT.with_borrow_mut(|current| *current = Some(Registration { id, parker }));
}

fn current() -> (ThreadId, Arc<Parker>) {
    CURRENT.with_borrow_mut(|current| {
        let registration = current.get_or_insert_with(|| {
            let id = reserve();
            let parker = lock(&REGISTRY).get(&id).cloned().unwrap_or_default();
            Registration { id, parker }
        });
        (registration.id, Arc::clone(&registration.parker))
    })
}

/// The scheduler and interrupt flag of the calling host thread.
#[derive(Debug, Copy, Clone, Default)]
pub struct HostScheduler;

impl Scheduler for HostScheduler {
    fn current_thread(&self) -> ThreadId {
        current().0
    }

    fn block_current(&self) {
        current().1.park();
    }

    fn wake(&self, thread: ThreadId) {
        let parker = lock(&REGISTRY).get(&thread).cloned();
        match parker {
            Some(parker) => parker.unpark(),
            None => log::warn!("wake for unknown thread {thread}"),
        }
    }
}

impl Interrupts for HostScheduler {
    fn disable(&self) -> InterruptState {
        InterruptState::new(IRQ_ENABLED.replace(false))
    }

    fn restore(&self, state: InterruptState) {
        IRQ_ENABLED.set(state.was_enabled());
    }

    fn are_enabled(&self) -> bool {
        IRQ_ENABLED.get()
    }
}
