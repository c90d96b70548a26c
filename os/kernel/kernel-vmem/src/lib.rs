//! # Virtual Memory Support
//!
//! Software-managed TLB handling for a 32-bit MIPS-style machine.
//!
//! ## What you get
//! - The hardware [`tlb`] entry format ([`TlbEntry`], [`EntryHi`], [`EntryLo`])
//!   and the [`Tlb`] access trait with refill helpers.
//! - A fixed-capacity per-process [`AddressSpace`] that doubles as the source
//!   of TLB refills, plus user memory copy helpers.
//! - An [`AsidAllocator`] for address space tags.
//! - Tiny collaborator traits for physical memory ([`FrameAlloc`], [`PhysMemory`]).
//!
//! ## Address translation
//!
//! ```text
//! | 31 ─────────── 13 | 12 | 11 ──── 0 |
//! |       VPN2        | EO |  Offset   |
//! ```
//!
//! User space (`kuseg`) spans `0x0000_0000..0x8000_0000` and is translated
//! through the TLB only. The hardware matches `VPN2` and the current ASID
//! against every slot; `EO` then picks the even (`EntryLo0`) or odd
//! (`EntryLo1`) half. Missing matches raise a TLB load/store exception that
//! the kernel answers by copying the matching entry from the current
//! [`AddressSpace`]. Kernel segments (`kseg0` and above) bypass the TLB.
//!
//! Since there is no demand paging, a process's whole page table must fit in
//! the TLB at once. [`fill`] loads it in one go when the process starts;
//! later misses only happen after other processes evicted entries.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod address_space;
mod asid;
pub mod tlb;

pub use crate::address_space::{AddressSpace, UserCopyError};
pub use crate::asid::AsidAllocator;
pub use crate::tlb::{Asid, EntryHi, EntryLo, Tlb, TlbEntry, TlbExceptionState};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{Frame, PhysicalAddress, VirtualAddress};

/// Physical page allocator.
///
/// The implementation decides where frames come from. Frames are 4 KiB and
/// are handed out with unspecified contents.
pub trait FrameAlloc {
    /// Allocate one 4 KiB frame, or `None` when memory is exhausted.
    fn alloc_4k(&self) -> Option<Frame>;

    /// Return a frame obtained from [`alloc_4k`](Self::alloc_4k).
    fn free_4k(&self, frame: Frame);

    /// Number of frames that can still be allocated.
    fn free_frames(&self) -> usize;
}

/// Byte access to physical memory, e.g. through `kseg0`.
pub trait PhysMemory {
    fn read(&self, pa: PhysicalAddress, buf: &mut [u8]);

    fn write(&self, pa: PhysicalAddress, bytes: &[u8]);

    /// Set every byte of `frame` to `value`.
    fn fill(&self, frame: Frame, value: u8) {
        let chunk = [value; 256];
        let mut pa = frame.base();
        for _ in 0..info::PAGE_SIZE / 256 {
            self.write(pa, &chunk);
            pa = pa + 256;
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmError {
    #[error("page table is full")]
    Full,
    #[error("address {0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("address {0} is outside user space")]
    NotUser(VirtualAddress),
}

/// Loads every entry of `space` into the TLB, starting at slot 0, and makes
/// its ASID current.
///
/// # Panics
/// Panics if the table holds more entries than the TLB has slots.
pub fn fill<T: Tlb + ?Sized>(tlb: &T, space: &AddressSpace) {
    let entries = space.entries();
    assert!(
        entries.len() <= tlb::capacity(tlb),
        "address space {} needs {} TLB entries, only {} exist",
        space.asid(),
        entries.len(),
        tlb::capacity(tlb)
    );

    tlb.write_entries(entries, 0);
    tlb.set_asid(space.asid());
}

/// Evicts every resident entry of `space`, e.g. before its ASID is released.
pub fn unload<T: Tlb + ?Sized>(tlb: &T, space: &AddressSpace) {
    for entry in space.entries() {
        tlb::update_resident(tlb, &TlbEntry::new(entry.vpn2(), space.asid()));
    }
}
