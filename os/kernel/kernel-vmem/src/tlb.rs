//! # Software-managed TLB
//!
//! The MIPS TLB holds a small number of entries, each translating an
//! even/odd pair of 4 KiB pages for one address space:
//!
//! ```text
//! EntryHi   | 31 ─────────── 13 | 12 ── 8 | 7 ──── 0 |
//!           |       VPN2        |    0    |   ASID   |
//!
//! EntryLo   | 31 ── 26 | 25 ─────────── 6 | 5 ─ 3 | 2 | 1 | 0 |
//! (0 and 1) |    0     |       PFN        |   C   | D | V | G |
//! ```
//!
//! `EntryLo0` maps the even page, `EntryLo1` the odd page. `D` ("dirty") is
//! the write-enable bit: a store to a page with `D = 0` raises a TLB modified
//! exception. The kernel keeps the same format in its page tables so a
//! refill is a plain copy.

use kernel_info::memory::KSEG0_BASE;
use kernel_memory_addresses::{Frame, PhysicalAddress, Size4K, VirtualAddress, Vpn2};

use bitfield_struct::bitfield;
use core::fmt;

/// Address space identifier, the tag that scopes TLB entries to one process.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Asid(u8);

impl Asid {
    /// The kernel's own tag; never handed to a process.
    pub const KERNEL: Self = Self(0);

    #[must_use]
    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for Asid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asid({})", self.0)
    }
}

impl fmt::Display for Asid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `EntryHi` word: which page pair of which address space.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryHi {
    #[bits(8)]
    pub asid: u8, // bits 0..=7

    #[bits(5)]
    __: u8, // reserved

    #[bits(19)]
    pub vpn2: u32, // bits 13..=31
}

/// An `EntryLo` word: translation of one page of the pair.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct EntryLo {
    /// Ignore the ASID when matching. Both halves must agree.
    pub global: bool, // bit 0

    /// The translation is usable.
    pub valid: bool, // bit 1

    /// Writes are allowed.
    pub dirty: bool, // bit 2

    /// Cache coherency attribute.
    #[bits(3)]
    pub cache: u8, // bits 3..=5

    #[bits(20)]
    pub pfn: u32, // bits 6..=25

    #[bits(6)]
    __: u8,
}

impl EntryLo {
    /// Cacheable, non-coherent, write-back.
    pub const CACHEABLE: u8 = 3;

    #[must_use]
    pub const fn mapping(frame: Frame, dirty: bool) -> Self {
        Self::new()
            .with_pfn(frame.number())
            .with_cache(Self::CACHEABLE)
            .with_valid(true)
            .with_dirty(dirty)
    }

    #[must_use]
    pub const fn frame(self) -> Frame {
        Frame::from_number(self.pfn())
    }
}

/// One TLB entry: a page pair of one address space.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct TlbEntry {
    pub hi: EntryHi,
    /// Even page.
    pub lo0: EntryLo,
    /// Odd page.
    pub lo1: EntryLo,
}

impl TlbEntry {
    /// An entry for `vpn2` with both halves invalid.
    #[must_use]
    pub const fn new(vpn2: Vpn2, asid: Asid) -> Self {
        Self {
            hi: EntryHi::new().with_vpn2(vpn2.as_u32()).with_asid(asid.as_u8()),
            lo0: EntryLo::new(),
            lo1: EntryLo::new(),
        }
    }

    /// A filler entry for hardware slot `slot` that can never match a user
    /// access: its VPN2 lies in the unmapped kernel segment and is unique
    /// per slot.
    #[must_use]
    pub const fn unused(slot: usize) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let vpn2 = (KSEG0_BASE >> 13) + slot as u32;
        Self::new(Vpn2::new(vpn2), Asid::KERNEL)
    }

    #[must_use]
    pub const fn vpn2(&self) -> Vpn2 {
        Vpn2::new(self.hi.vpn2())
    }

    #[must_use]
    pub const fn asid(&self) -> Asid {
        Asid::new(self.hi.asid())
    }

    /// The half that translates `va`.
    #[must_use]
    pub const fn half(&self, va: VirtualAddress) -> EntryLo {
        if va.is_odd_page() { self.lo1 } else { self.lo0 }
    }

    pub const fn half_mut(&mut self, va: VirtualAddress) -> &mut EntryLo {
        if va.is_odd_page() {
            &mut self.lo1
        } else {
            &mut self.lo0
        }
    }

    /// Whether neither page of the pair is mapped.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !self.lo0.valid() && !self.lo1.valid()
    }

    /// Whether this entry translates `va` for address space `asid`.
    #[must_use]
    pub fn matches(&self, vpn2: Vpn2, asid: Asid) -> bool {
        self.vpn2() == vpn2 && (self.asid() == asid || (self.lo0.global() && self.lo1.global()))
    }

    /// Physical address of `va`, if its half is valid.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let lo = self.half(va);
        lo.valid().then(|| lo.frame().join(va.offset::<Size4K>()))
    }
}

impl fmt::Debug for TlbEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let half = |lo: EntryLo| (lo.valid(), lo.dirty(), lo.pfn());
        f.debug_struct("TlbEntry")
            .field("vpn2", &self.vpn2())
            .field("asid", &self.asid())
            .field("even", &half(self.lo0))
            .field("odd", &half(self.lo1))
            .finish()
    }
}

/// What the hardware recorded about the last TLB exception.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TlbExceptionState {
    /// The faulting virtual address (`BadVAddr`).
    pub bad_vaddr: VirtualAddress,
    /// Its page pair number (`Context.BadVPN2`).
    pub bad_vpn2: Vpn2,
    /// The ASID that was active when the fault happened.
    pub asid: Asid,
}

/// Access to the CPU's TLB.
///
/// Callers mask interrupts around every sequence of calls that has to appear
/// atomic, such as a probe followed by an indexed write.
pub trait Tlb {
    /// Index of the last hardware slot; the TLB holds `max_index() + 1` entries.
    fn max_index(&self) -> usize;

    /// Writes `entries` to consecutive slots starting at `first`.
    fn write_entries(&self, entries: &[TlbEntry], first: usize);

    /// Writes `entry` to a slot chosen by the hardware's random register.
    fn write_random(&self, entry: &TlbEntry);

    /// The slot holding an entry that matches `hi`, if any.
    fn probe(&self, hi: EntryHi) -> Option<usize>;

    /// Sets the ASID used for matching subsequent accesses.
    fn set_asid(&self, asid: Asid);

    fn exception_state(&self) -> TlbExceptionState;
}

/// Number of hardware slots.
#[inline]
pub fn capacity<T: Tlb + ?Sized>(tlb: &T) -> usize {
    tlb.max_index() + 1
}

/// Installs `entry`, replacing a resident entry for the same page pair in
/// place so the TLB never holds two matching entries.
pub fn refill<T: Tlb + ?Sized>(tlb: &T, entry: &TlbEntry) {
    match tlb.probe(entry.hi) {
        Some(slot) => tlb.write_entries(core::slice::from_ref(entry), slot),
        None => tlb.write_random(entry),
    }
}

/// Brings a resident copy of `entry`'s page pair up to date, if there is one.
///
/// An empty entry evicts the pair.
pub fn update_resident<T: Tlb + ?Sized>(tlb: &T, entry: &TlbEntry) {
    if let Some(slot) = tlb.probe(entry.hi) {
        let replacement = if entry.is_empty() {
            TlbEntry::unused(slot)
        } else {
            *entry
        };
        tlb.write_entries(core::slice::from_ref(&replacement), slot);
    }
}

/// Invalidates every slot.
pub fn flush_all<T: Tlb + ?Sized>(tlb: &T) {
    for slot in 0..capacity(tlb) {
        tlb.write_entries(&[TlbEntry::unused(slot)], slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_hi_layout() {
        let hi = EntryHi::new().with_vpn2(0x7_ffff).with_asid(0xab);
        assert_eq!(hi.into_bits(), 0xffff_e0ab);
        assert_eq!(EntryHi::from_bits(0x0040_2005).vpn2(), 0x0040_2000 >> 13);
    }

    #[test]
    fn entry_lo_layout() {
        let lo = EntryLo::mapping(Frame::from_number(0x123), true);
        assert_eq!(lo.into_bits(), (0x123 << 6) | (3 << 3) | 0b110);
        assert_eq!(lo.frame(), Frame::from_number(0x123));
    }

    #[test]
    fn halves_follow_page_parity() {
        let va_even = VirtualAddress::new(0x0040_0010);
        let va_odd = VirtualAddress::new(0x0040_1010);
        let mut entry = TlbEntry::new(va_even.vpn2(), Asid::new(4));
        *entry.half_mut(va_odd) = EntryLo::mapping(Frame::from_number(9), false);

        assert_eq!(entry.translate(va_even), None);
        assert_eq!(entry.translate(va_odd), Some(PhysicalAddress::new(0x9010)));
        assert!(!entry.is_empty());
        assert!(entry.matches(va_odd.vpn2(), Asid::new(4)));
        assert!(!entry.matches(va_odd.vpn2(), Asid::new(5)));
    }

    #[test]
    fn unused_entries_are_unique_and_unreachable() {
        let a = TlbEntry::unused(0);
        let b = TlbEntry::unused(1);
        assert_ne!(a.vpn2(), b.vpn2());
        assert!(!a.vpn2().base().is_user());
        assert!(a.is_empty());
    }
}
