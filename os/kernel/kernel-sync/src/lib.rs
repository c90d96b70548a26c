//! # Kernel synchronization primitives
//!
//! The kernel's synchronization vocabulary, from the bottom up:
//!
//! * [`RawSpin`]: a busy-waiting spinlock for short critical sections, and
//!   [`SpinLock<T>`], a value protected by one.
//! * [`IrqGuard`]: masks interrupts for a scope through the platform's
//!   [`Interrupts`] implementation.
//! * [`SleepQueue`]: threads blocked on a [`ResourceId`], woken one at a time
//!   in arrival order or all at once.
//! * [`Lock`] and [`Condition`]: a sleeping lock and a condition variable
//!   built from the three above and the platform [`Scheduler`].
//!
//! Every operation that touches shared state both masks interrupts and holds
//! a spinlock. The only points where a thread can be suspended are a
//! contended [`Lock::acquire`] and [`Condition::wait`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

extern crate alloc;

mod condition;
pub mod irq;
mod lock;
mod raw_spin;
mod scheduler;
mod sleepq;
mod spin_lock;

pub use condition::Condition;
pub use irq::{InterruptState, Interrupts, IrqGuard};
pub use lock::{Lock, LockError};
pub use raw_spin::{RawSpin, RawSpinGuard};
pub use scheduler::{Scheduler, ThreadId};
pub use sleepq::{ResourceId, SleepQueue};
pub use spin_lock::{IrqSpinLockGuard, SpinLock, SpinLockGuard};

/// Everything a blocking primitive needs from the platform.
pub trait Platform: Scheduler + Interrupts {}

impl<T: Scheduler + Interrupts + ?Sized> Platform for T {}
