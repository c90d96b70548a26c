//! # Kernel Core
//!
//! Process management and TLB exception handling for a small MIPS kernel.
//!
//! ## Overview
//!
//! A [`Kernel`] owns the process table and ties it to the [`Machine`] it
//! runs on. Every user process runs in a kernel thread of its own; that
//! thread carries the process id and the process's
//! [`AddressSpace`](kernel_vmem::AddressSpace) in its [`ThreadInfo`].
//!
//! ```text
//!   exec ──► spawn ──► new thread ──► start ──► userland
//!                                                  │
//!   join ◄── (zombie) ◄── finish ◄── exit / fault ◄┘
//! ```
//!
//! * [`process`] implements spawn, start, join, finish and `memlimit`.
//! * [`tlb`] answers TLB load, store and modified exceptions from the
//!   current address space.
//! * [`syscall`] decodes a trapped user context and calls into the above.
//!
//! The scheduler, the TLB, physical memory, the executable loader and the
//! console are collaborators behind the traits in [`machine`].
//!
//! ## Concurrency
//!
//! The process table is one [`SpinLock`](kernel_sync::SpinLock), always
//! taken with interrupts disabled. The only place a kernel operation blocks
//! is `join` waiting for a running child; it sleeps on the child's table
//! slot in the kernel's [`SleepQueue`](kernel_sync::SleepQueue).

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

pub mod init;
pub mod machine;
pub mod process;
pub mod syscall;
pub mod tlb;

pub use crate::machine::{
    ExecutableInfo, ImageError, ImageLoader, Machine, Power, Segment, ThreadInfo, Threads,
    TrapHandler, UserMode,
};
pub use crate::process::{
    JoinError, MemLimitError, ProcessId, ProcessState, ProcessTable, SpawnError,
};

use alloc::boxed::Box;
use alloc::sync::Arc;
use kernel_sync::SleepQueue;
use kernel_vmem::{AddressSpace, AsidAllocator};

/// The kernel's global state.
///
/// Created once at boot by [`Kernel::new`] and never dropped.
pub struct Kernel<M: Machine> {
    machine: Arc<M>,
    sleepq: SleepQueue<Arc<M>>,
    processes: ProcessTable,
    asids: AsidAllocator,
}

impl<M: Machine> Kernel<M> {
    /// Sets up an empty process table on `machine`.
    ///
    /// The kernel lives for the rest of the machine's lifetime; kernel
    /// threads it creates keep a reference to it.
    #[must_use]
    pub fn new(machine: Arc<M>) -> &'static Self {
        let kernel = Box::new(Self {
            sleepq: SleepQueue::new(Arc::clone(&machine)),
            machine,
            processes: ProcessTable::new(),
            asids: AsidAllocator::new(),
        });
        log::info!(
            "kernel up: {} process slots, {} TLB entries",
            kernel_info::process::PROCESS_MAX_PROCESSES,
            kernel_vmem::tlb::capacity(&*kernel.machine)
        );
        Box::leak(kernel)
    }

    #[inline]
    #[must_use]
    pub fn machine(&self) -> &M {
        &self.machine
    }

    #[inline]
    #[must_use]
    pub const fn sleep_queue(&self) -> &SleepQueue<Arc<M>> {
        &self.sleepq
    }

    #[inline]
    #[must_use]
    pub const fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// The process run by the calling thread, if any.
    #[must_use]
    pub fn current_process(&self) -> Option<ProcessId> {
        self.machine.with_current(|thread| thread.process_id)
    }

    /// Runs `f` on the calling thread's address space.
    ///
    /// The space is moved out of the thread's info for the duration of the
    /// call so `f` may call back into the machine. Returns `None` for kernel
    /// threads, which have no address space.
    fn with_address_space<R>(&self, f: impl FnOnce(&mut AddressSpace) -> R) -> Option<R> {
        let mut space = self
            .machine
            .with_current(|thread| thread.address_space.take())?;
        let result = f(&mut space);
        self.machine
            .with_current(|thread| thread.address_space = Some(space));
        Some(result)
    }
}

impl<M: Machine> TrapHandler for Kernel<M> {
    fn syscall(&'static self, ctx: &mut kernel_syscall::UserContext) {
        self.handle_syscall(ctx);
    }

    fn tlb_load(&'static self) {
        self.handle_tlb_miss(tlb::Access::Load);
    }

    fn tlb_store(&'static self) {
        self.handle_tlb_miss(tlb::Access::Store);
    }

    fn tlb_modified(&'static self) {
        self.handle_tlb_modified();
    }
}
