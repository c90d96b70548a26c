//! # Per-process Address Space
//!
//! A process's page table is a short, fixed-capacity list of TLB entries, one
//! per mapped page pair. It is small enough to be searched linearly on every
//! TLB miss and to be loaded into the hardware TLB as a whole when the
//! process starts.
//!
//! ## Ownership
//!
//! An [`AddressSpace`] belongs to the kernel thread that runs its process and
//! is never shared, so it carries no lock. It does not return its frames on
//! drop; call [`AddressSpace::destroy`] with the allocator they came from.
//!
//! ## Invariants
//!
//! - The first [`valid_count`](AddressSpace::valid_count) entries are in use,
//!   each for a distinct VPN2, and each maps at least one page.
//! - `valid_count <= PAGETABLE_ENTRIES <= TLB_ENTRIES`.

mod user_copy;

pub use user_copy::UserCopyError;

use crate::tlb::{Asid, EntryLo, TlbEntry};
use crate::{FrameAlloc, VmError};
use kernel_info::memory::PAGETABLE_ENTRIES;
use kernel_memory_addresses::{Frame, PhysicalAddress, VirtualAddress, Vpn2};

/// Page table of one process.
pub struct AddressSpace {
    asid: Asid,
    entries: [TlbEntry; PAGETABLE_ENTRIES],
    valid_count: usize,
}

impl AddressSpace {
    /// An empty table tagged with `asid`.
    #[must_use]
    pub fn new(asid: Asid) -> Self {
        Self {
            asid,
            entries: [TlbEntry::default(); PAGETABLE_ENTRIES],
            valid_count: 0,
        }
    }

    #[inline]
    #[must_use]
    pub const fn asid(&self) -> Asid {
        self.asid
    }

    #[inline]
    #[must_use]
    pub const fn valid_count(&self) -> usize {
        self.valid_count
    }

    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        PAGETABLE_ENTRIES
    }

    /// The entries in use.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[TlbEntry] {
        &self.entries[..self.valid_count]
    }

    /// The entry for page pair `vpn2`, if one is in use.
    #[must_use]
    pub fn lookup(&self, vpn2: Vpn2) -> Option<&TlbEntry> {
        self.entries().iter().find(|e| e.vpn2() == vpn2)
    }

    fn index_of(&self, vpn2: Vpn2) -> Option<usize> {
        self.entries().iter().position(|e| e.vpn2() == vpn2)
    }

    /// Whether [`map`](Self::map) for `va` would succeed.
    #[must_use]
    pub fn can_map(&self, va: VirtualAddress) -> bool {
        va.is_user() && (self.index_of(va.vpn2()).is_some() || self.valid_count < PAGETABLE_ENTRIES)
    }

    /// Maps the page containing `va` to `frame`.
    ///
    /// Updates the entry of `va`'s page pair if there is one and starts a new
    /// entry otherwise. `dirty` makes the page writable.
    ///
    /// # Panics
    /// Panics if a new entry is needed and the table is full, or if `va` is
    /// not a user address.
    pub fn map(&mut self, frame: Frame, va: VirtualAddress, dirty: bool) {
        if let Err(e) = self.try_map(frame, va, dirty) {
            panic!("cannot map {va} in address space {}: {e}", self.asid);
        }
    }

    /// Fallible form of [`map`](Self::map).
    ///
    /// # Errors
    /// [`VmError::Full`] if a new entry is needed and the table is full,
    /// [`VmError::NotUser`] if `va` is not in the user segment.
    pub fn try_map(&mut self, frame: Frame, va: VirtualAddress, dirty: bool) -> Result<(), VmError> {
        if !va.is_user() {
            return Err(VmError::NotUser(va));
        }

        let vpn2 = va.vpn2();
        let index = match self.index_of(vpn2) {
            Some(index) => index,
            None => {
                if self.valid_count == PAGETABLE_ENTRIES {
                    return Err(VmError::Full);
                }
                let index = self.valid_count;
                self.entries[index] = TlbEntry::new(vpn2, self.asid);
                self.valid_count += 1;
                index
            }
        };

        *self.entries[index].half_mut(va) = EntryLo::mapping(frame, dirty);
        Ok(())
    }

    /// Removes the mapping of the page containing `va` and returns its frame.
    ///
    /// An entry whose both pages are unmapped is removed; the last entry
    /// moves into its place.
    pub fn unmap(&mut self, va: VirtualAddress) -> Option<Frame> {
        let index = self.index_of(va.vpn2())?;
        let half = self.entries[index].half_mut(va);
        if !half.valid() {
            return None;
        }

        let frame = half.frame();
        *half = EntryLo::new();

        if self.entries[index].is_empty() {
            self.valid_count -= 1;
            self.entries.swap(index, self.valid_count);
            self.entries[self.valid_count] = TlbEntry::default();
        }
        Some(frame)
    }

    /// Changes the write permission of the mapped page containing `va`.
    ///
    /// # Errors
    /// [`VmError::NotMapped`] if the page is not mapped.
    pub fn set_dirty(&mut self, va: VirtualAddress, dirty: bool) -> Result<(), VmError> {
        let index = self.index_of(va.vpn2()).ok_or(VmError::NotMapped(va))?;
        let half = self.entries[index].half_mut(va);
        if !half.valid() {
            return Err(VmError::NotMapped(va));
        }
        half.set_dirty(dirty);
        Ok(())
    }

    /// Physical address of `va`, if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.lookup(va.vpn2())?.translate(va)
    }

    /// Whether the page containing `va` is mapped writable.
    #[must_use]
    pub fn is_writable(&self, va: VirtualAddress) -> bool {
        self.lookup(va.vpn2()).is_some_and(|e| {
            let half = e.half(va);
            half.valid() && half.dirty()
        })
    }

    /// Returns every mapped frame to `frames` and consumes the table.
    ///
    /// Returns the number of frames released.
    pub fn destroy<A: FrameAlloc + ?Sized>(self, frames: &A) -> usize {
        let mut released = 0;
        for entry in self.entries() {
            for half in [entry.lo0, entry.lo1] {
                if half.valid() {
                    frames.free_4k(half.frame());
                    released += 1;
                }
            }
        }
        log::debug!("address space {} destroyed, {released} frames released", self.asid);
        released
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("asid", &self.asid)
            .field("entries", &self.entries())
            .finish()
    }
}
