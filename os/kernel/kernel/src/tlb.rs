//! # TLB Exceptions
//!
//! The page table of a process is small enough to be loaded completely when
//! the process starts, so misses only occur after entries were displaced by
//! other processes. A miss copies the matching entry back from the current
//! address space. A miss on an address that is not mapped at all stops the
//! kernel; there is no demand paging to fall back on.
//!
//! A store to a page with a clear dirty bit is a write to read-only memory
//! and kills the offending process with [`EXIT_WRITE_PROTECTED`].

use crate::process::EXIT_WRITE_PROTECTED;
use crate::{Kernel, Machine};
use kernel_sync::IrqGuard;
use kernel_vmem::{Tlb, tlb};

/// Kind of TLB miss, for diagnostics.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    Load,
    Store,
}

impl<M: Machine> Kernel<M> {
    /// Answers a TLB load or store miss from the current address space.
    ///
    /// # Panics
    /// Panics if the faulting page is not mapped, or if the faulting thread
    /// has no address space.
    pub fn handle_tlb_miss(&self, access: Access) {
        let state = self.machine.exception_state();
        let entry = self.machine.with_current(|info| {
            info.address_space
                .as_ref()
                .map(|space| {
                    space
                        .lookup(state.bad_vpn2)
                        .filter(|entry| entry.half(state.bad_vaddr).valid())
                        .copied()
                })
        });

        match entry {
            Some(Some(entry)) => {
                log::trace!("TLB refill for {} ({access:?})", state.bad_vaddr);
                let _irq = IrqGuard::new(self.machine());
                tlb::refill(self.machine(), &entry);
            }
            Some(None) => {
                log::error!(
                    "{access:?} access to unmapped address {} (ASID {})",
                    state.bad_vaddr,
                    state.asid
                );
                panic!("TLB miss on unmapped address {}", state.bad_vaddr);
            }
            None => {
                log::error!("TLB miss in kernel thread at {}", state.bad_vaddr);
                panic!("TLB miss without an address space at {}", state.bad_vaddr);
            }
        }
    }

    /// Answers a write to a read-only page.
    ///
    /// Terminates the current process with [`EXIT_WRITE_PROTECTED`].
    ///
    /// # Panics
    /// Panics if the fault happened in a kernel thread.
    pub fn handle_tlb_modified(&self) -> ! {
        let state = self.machine.exception_state();
        let Some(pid) = self.current_process() else {
            log::error!("write to read-only page {} in kernel thread", state.bad_vaddr);
            panic!("TLB modified exception in kernel thread at {}", state.bad_vaddr);
        };

        log::info!(
            "process {pid} wrote to read-only address {}, terminating",
            state.bad_vaddr
        );
        self.finish(EXIT_WRITE_PROTECTED)
    }
}
