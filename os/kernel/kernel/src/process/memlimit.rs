//! Heap management for the `memlimit` system call.

use super::MemLimitError;
use crate::{Kernel, Machine};
use kernel_info::memory::{PAGE_SIZE, USERLAND_STACK_PAGES, USERLAND_STACK_TOP};
use kernel_memory_addresses::{Size4K, VirtualAddress};
use kernel_sync::IrqGuard;
use kernel_vmem::{AddressSpace, FrameAlloc, PhysMemory, TlbEntry, tlb};

/// Lowest address of the user stack; the heap must stay below.
const STACK_BOTTOM: VirtualAddress = VirtualAddress::new(
    USERLAND_STACK_TOP.align_down::<Size4K>().as_u32() - (USERLAND_STACK_PAGES - 1) * PAGE_SIZE,
);

impl<M: Machine> Kernel<M> {
    /// Moves the end of the calling process's heap to `new_end`, or reports
    /// the current end if `new_end` is null.
    ///
    /// Growing maps zeroed writable pages, shrinking unmaps and frees them.
    /// On failure the heap is left as it was.
    ///
    /// # Errors
    /// [`MemLimitError::InvalidAddress`] for ends below the heap start or
    /// above the stack, [`MemLimitError::OutOfMemory`] and
    /// [`MemLimitError::AddressSpaceFull`] if the pages cannot be mapped.
    pub fn memlimit(&self, new_end: VirtualAddress) -> Result<VirtualAddress, MemLimitError> {
        let pid = self.current_process().ok_or(MemLimitError::NotAProcess)?;
        let pcb = self.processes.snapshot(self.machine(), pid);
        if new_end.is_null() {
            return Ok(pcb.heap_end);
        }
        if new_end < pcb.heap_start || new_end > STACK_BOTTOM {
            return Err(MemLimitError::InvalidAddress(new_end.as_u32()));
        }

        // Both are at most `STACK_BOTTOM`, which is page aligned.
        let old_top = pcb.heap_end.checked_align_up::<Size4K>().unwrap_or(STACK_BOTTOM);
        let new_top = new_end.checked_align_up::<Size4K>().unwrap_or(STACK_BOTTOM);

        self.with_address_space(|space| {
            if new_top > old_top {
                self.grow_heap(space, old_top, new_top)
            } else {
                self.shrink_heap(space, new_top, old_top);
                Ok(())
            }
        })
        .ok_or(MemLimitError::NotAProcess)??;

        self.processes.lock(self.machine())[pid].heap_end = new_end;
        log::debug!("process {pid} heap end {} -> {new_end}", pcb.heap_end);
        Ok(new_end)
    }

    fn grow_heap(&self, space: &mut AddressSpace, from: VirtualAddress, to: VirtualAddress) -> Result<(), MemLimitError> {
        let mut va = from;
        while va < to {
            if !space.can_map(va) {
                self.shrink_heap(space, from, va);
                return Err(MemLimitError::AddressSpaceFull);
            }
            let Some(frame) = self.machine.alloc_4k() else {
                self.shrink_heap(space, from, va);
                return Err(MemLimitError::OutOfMemory);
            };
            self.machine.fill(frame, 0);
            space.map(frame, va, true);
            va += PAGE_SIZE;
        }
        Ok(())
    }

    /// Unmaps `[from, to)` and evicts the affected TLB entries.
    fn shrink_heap(&self, space: &mut AddressSpace, from: VirtualAddress, to: VirtualAddress) {
        let mut va = from;
        while va < to {
            if let Some(frame) = space.unmap(va) {
                self.machine.free_4k(frame);
                let entry = space
                    .lookup(va.vpn2())
                    .copied()
                    .unwrap_or_else(|| TlbEntry::new(va.vpn2(), space.asid()));
                let _irq = IrqGuard::new(self.machine());
                tlb::update_resident(self.machine(), &entry);
            }
            va += PAGE_SIZE;
        }
    }
}
