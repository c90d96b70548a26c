use kernel_sim::HostScheduler;
use kernel_sync::{Condition, Interrupts, Lock, LockError, ResourceId, Scheduler, SleepQueue};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

struct Shared {
    sleepq: SleepQueue<HostScheduler>,
    lock: Lock,
    cond: Condition,
    counter: AtomicUsize,
}

impl Shared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            sleepq: SleepQueue::new(HostScheduler),
            lock: Lock::new(),
            cond: Condition::new(),
            counter: AtomicUsize::new(0),
        })
    }
}

#[test]
fn lock_provides_mutual_exclusion() {
    const THREADS: usize = 6;
    const ITERS: usize = 500;

    let shared = Shared::new();
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let shared = Arc::clone(&shared);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for i in 0..ITERS {
                    shared.lock.acquire(&shared.sleepq);
                    let me = HostScheduler.current_thread();
                    assert!(shared.lock.is_held_by(me));
                    assert_eq!(in_cs.fetch_add(1, Ordering::SeqCst), 0, "two holders");
                    shared.counter.fetch_add(1, Ordering::Relaxed);
                    if i % 16 == 0 {
                        thread::yield_now();
                    }
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                    shared.lock.release(&shared.sleepq);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(shared.counter.load(Ordering::SeqCst), THREADS * ITERS);
    assert!(!shared.lock.is_locked());
}

#[test]
fn contended_acquirer_sleeps_until_release() {
    let shared = Shared::new();
    shared.lock.acquire(&shared.sleepq);

    let acquired = Arc::new(AtomicBool::new(false));
    let waiter = {
        let shared = Arc::clone(&shared);
        let acquired = Arc::clone(&acquired);
        thread::spawn(move || {
            shared.lock.acquire(&shared.sleepq);
            acquired.store(true, Ordering::SeqCst);
            shared.lock.release(&shared.sleepq);
        })
    };

    let id = ResourceId::of(&shared.lock);
    wait_until("the waiter to sleep", || shared.sleepq.sleepers_on(id) == 1);
    assert!(!acquired.load(Ordering::SeqCst));

    shared.lock.release(&shared.sleepq);
    waiter.join().unwrap();
    assert!(acquired.load(Ordering::SeqCst));
}

#[test]
fn acquire_restores_interrupt_state() {
    let shared = Shared::new();
    assert!(HostScheduler.are_enabled());
    shared.lock.acquire(&shared.sleepq);
    assert!(HostScheduler.are_enabled());
    shared.lock.release(&shared.sleepq);
    assert!(HostScheduler.are_enabled());
}

#[test]
fn reset_refuses_a_held_lock() {
    let shared = Shared::new();
    assert_eq!(shared.lock.reset(), Ok(()));
    shared.lock.acquire(&shared.sleepq);
    assert_eq!(shared.lock.reset(), Err(LockError::Held));
    shared.lock.release(&shared.sleepq);
    assert_eq!(shared.lock.reset(), Ok(()));
}

#[test]
#[should_panic(expected = "recursively")]
fn recursive_acquire_is_fatal() {
    let shared = Shared::new();
    shared.lock.acquire(&shared.sleepq);
    shared.lock.acquire(&shared.sleepq);
}

#[test]
#[should_panic(expected = "does not hold it")]
fn release_by_non_holder_is_fatal() {
    let shared = Shared::new();
    shared.lock.release(&shared.sleepq);
}

#[test]
#[should_panic(expected = "without holding the lock")]
fn signal_without_lock_is_fatal() {
    let shared = Shared::new();
    shared.cond.signal(&shared.lock, &shared.sleepq);
}

#[test]
fn signal_wakes_a_waiter_that_started_before_it() {
    let shared = Shared::new();

    let waiter = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            shared.lock.acquire(&shared.sleepq);
            while shared.counter.load(Ordering::SeqCst) == 0 {
                shared.cond.wait(&shared.lock, &shared.sleepq);
            }
            let me = HostScheduler.current_thread();
            assert!(shared.lock.is_held_by(me), "wait must return holding the lock");
            shared.lock.release(&shared.sleepq);
        })
    };

    let id = ResourceId::of(&shared.cond);
    wait_until("the waiter to block", || shared.sleepq.sleepers_on(id) == 1);

    shared.lock.acquire(&shared.sleepq);
    shared.counter.store(1, Ordering::SeqCst);
    shared.cond.signal(&shared.lock, &shared.sleepq);
    shared.lock.release(&shared.sleepq);

    waiter.join().unwrap();
}

#[test]
fn signal_right_after_wait_registers_is_not_lost() {
    // The signaller grabs the lock the instant the waiter releases it inside
    // `wait`, which is before the waiter actually blocks.
    for _ in 0..200 {
        let shared = Shared::new();
        let ready = Arc::new(Barrier::new(2));

        let waiter = {
            let shared = Arc::clone(&shared);
            let ready = Arc::clone(&ready);
            thread::spawn(move || {
                shared.lock.acquire(&shared.sleepq);
                ready.wait();
                shared.cond.wait(&shared.lock, &shared.sleepq);
                shared.lock.release(&shared.sleepq);
            })
        };

        ready.wait();
        shared.lock.acquire(&shared.sleepq);
        shared.cond.signal(&shared.lock, &shared.sleepq);
        shared.lock.release(&shared.sleepq);

        waiter.join().unwrap();
    }
}

#[test]
fn broadcast_wakes_every_waiter() {
    const WAITERS: usize = 5;
    let shared = Shared::new();
    let released = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..WAITERS)
        .map(|_| {
            let shared = Arc::clone(&shared);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                shared.lock.acquire(&shared.sleepq);
                shared.cond.wait(&shared.lock, &shared.sleepq);
                released.fetch_add(1, Ordering::SeqCst);
                shared.lock.release(&shared.sleepq);
            })
        })
        .collect();

    let id = ResourceId::of(&shared.cond);
    wait_until("all waiters to block", || shared.sleepq.sleepers_on(id) == WAITERS);

    shared.lock.acquire(&shared.sleepq);
    shared.cond.broadcast(&shared.lock, &shared.sleepq);
    shared.lock.release(&shared.sleepq);

    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(released.load(Ordering::SeqCst), WAITERS);
}

#[test]
fn signal_wakes_only_one() {
    let shared = Shared::new();
    let released = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let shared = Arc::clone(&shared);
            let released = Arc::clone(&released);
            thread::spawn(move || {
                shared.lock.acquire(&shared.sleepq);
                shared.cond.wait(&shared.lock, &shared.sleepq);
                released.fetch_add(1, Ordering::SeqCst);
                shared.lock.release(&shared.sleepq);
            })
        })
        .collect();

    let id = ResourceId::of(&shared.cond);
    wait_until("both waiters to block", || shared.sleepq.sleepers_on(id) == 2);

    shared.lock.acquire(&shared.sleepq);
    shared.cond.signal(&shared.lock, &shared.sleepq);
    shared.lock.release(&shared.sleepq);

    wait_until("one waiter to return", || released.load(Ordering::SeqCst) == 1);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(shared.sleepq.sleepers_on(id), 1);

    shared.lock.acquire(&shared.sleepq);
    shared.cond.signal(&shared.lock, &shared.sleepq);
    shared.lock.release(&shared.sleepq);

    for h in handles {
        h.join().unwrap();
    }
}
