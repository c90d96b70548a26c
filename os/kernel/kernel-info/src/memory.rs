//! # Memory Layout

use kernel_memory_addresses::{PageSize, Size4K, VirtualAddress};

/// Size of one page frame in bytes.
pub const PAGE_SIZE: u32 = Size4K::SIZE;

/// Start of the unmapped kernel segment; user space ends right below.
pub const KSEG0_BASE: u32 = 0x8000_0000;

/// Initial stack pointer of every user process.
///
/// The stack pages are mapped downwards from the page containing this address.
pub const USERLAND_STACK_TOP: VirtualAddress = VirtualAddress::new(0x7fff_effc);

/// Number of pages mapped for the user stack.
pub const USERLAND_STACK_PAGES: u32 = 1;

/// Lowest address an executable may place its entry point or segments at.
/// The first page stays unmapped so that null pointer accesses fault.
pub const USERLAND_MIN_ADDRESS: VirtualAddress = VirtualAddress::new(PAGE_SIZE);

/// Number of hardware TLB slots.
pub const TLB_ENTRIES: usize = 16;

/// Capacity of a per-process page table, in TLB entries (page pairs).
///
/// Must not exceed [`TLB_ENTRIES`]; every mapping of a process has to be
/// resident in the TLB at the same time.
pub const PAGETABLE_ENTRIES: usize = 16;

const _: () = {
    assert!(PAGETABLE_ENTRIES <= TLB_ENTRIES);
    assert!(USERLAND_STACK_TOP.as_u32() < KSEG0_BASE);
    assert!(USERLAND_STACK_PAGES >= 1);
    assert!(USERLAND_STACK_TOP.as_u32() / PAGE_SIZE >= USERLAND_STACK_PAGES);
};
