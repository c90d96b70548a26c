use kernel_sync::{InterruptState, Interrupts, SpinLock};
use std::cell::Cell;
use std::panic;

struct IrqFlag(Cell<bool>);

impl Interrupts for IrqFlag {
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
fn try_lock_fails_while_held() {
    let l = SpinLock::new(1u8);

    let g1 = l.try_lock();
    assert!(g1.is_some());
    assert!(l.try_lock().is_none());

    drop(g1);
    assert!(l.try_lock().is_some());
}

#[test]
fn lock_irq_masks_interrupts_for_the_critical_section() {
    let irq = IrqFlag(Cell::new(true));
    let l = SpinLock::new(Vec::<u32>::new());

    {
        let mut table = l.lock_irq(&irq);
        table.push(7);
        assert!(!irq.are_enabled());
        assert!(l.try_lock().is_none());
    }

    assert!(irq.are_enabled());
    assert_eq!(l.lock().as_slice(), &[7]);
}

#[test]
fn into_parts_keeps_interrupts_masked_after_unlock() {
    let irq = IrqFlag(Cell::new(true));
    let l = SpinLock::new(0u32);

    let (guard, irq_guard) = l.lock_irq(&irq).into_parts();
    drop(guard);
    assert!(l.try_lock().is_some());
    assert!(!irq.are_enabled());
    drop(irq_guard);
    assert!(irq.are_enabled());
}

#[test]
fn contended_increments_are_exact_and_exclusive() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    let threads = 8;
    let iters = 5_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let mut handles = Vec::with_capacity(threads);
    for _ in 0..threads {
        let lock = Arc::clone(&lock);
        let in_cs = Arc::clone(&in_cs);
        let start = Arc::clone(&start);
        handles.push(thread::spawn(move || {
            start.wait();
            for _ in 0..iters {
                lock.with_lock(|v| {
                    let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(prev, 0, "mutual exclusion violated");
                    *v += 1;
                    in_cs.fetch_sub(1, Ordering::SeqCst);
                });
                thread::yield_now();
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(lock.with_lock(|v| *v), threads * iters);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");

    assert_eq!(l.with_lock(|v| *v), 123);
}
