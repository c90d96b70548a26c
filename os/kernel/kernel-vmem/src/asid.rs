//! # ASID allocation
//!
//! Hands out the 255 process ASIDs round robin. A released ASID only becomes
//! available again after the cursor has wrapped, and every wrap flushes the
//! whole TLB first, so no entry tagged by a previous owner survives into a
//! new address space.

use crate::tlb::{self, Asid, Tlb};
use kernel_sync::SpinLock;

const WORDS: usize = 256 / 32;

struct AsidState {
    /// Next ASID to try.
    cursor: u8,
    in_use: [u32; WORDS],
}

impl AsidState {
    const fn is_used(&self, asid: u8) -> bool {
        self.in_use[asid as usize / 32] & (1 << (asid % 32)) != 0
    }

    const fn set_used(&mut self, asid: u8, used: bool) {
        let bit = 1 << (asid % 32);
        if used {
            self.in_use[asid as usize / 32] |= bit;
        } else {
            self.in_use[asid as usize / 32] &= !bit;
        }
    }
}

/// Round-robin allocator for process ASIDs.
pub struct AsidAllocator {
    state: SpinLock<AsidState>,
}

impl AsidAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SpinLock::new(AsidState {
                cursor: 1,
                in_use: [0; WORDS],
            }),
        }
    }

    /// Takes the next free ASID, flushing `tlb` when the cursor wraps.
    ///
    /// Returns `None` when all 255 are in use.
    pub fn allocate<T: Tlb + ?Sized>(&self, tlb: &T) -> Option<Asid> {
        let mut state = self.state.lock();
        for _ in 0..u8::MAX {
            let candidate = state.cursor;
            state.cursor = match candidate.checked_add(1) {
                Some(next) => next,
                None => {
                    log::debug!("ASIDs wrapped, flushing TLB");
                    tlb::flush_all(tlb);
                    1
                }
            };

            if !state.is_used(candidate) {
                state.set_used(candidate, true);
                return Some(Asid::new(candidate));
            }
        }
        None
    }

    /// Marks `asid` free. It is reused after the next wrap.
    ///
    /// # Panics
    /// Panics on the kernel ASID or one that is not allocated.
    pub fn release(&self, asid: Asid) {
        assert_ne!(asid, Asid::KERNEL, "the kernel ASID is never allocated");
        let mut state = self.state.lock();
        assert!(state.is_used(asid.as_u8()), "ASID {asid} released twice");
        state.set_used(asid.as_u8(), false);
    }

    /// Number of ASIDs currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        let state = self.state.lock();
        state.in_use.iter().map(|w| w.count_ones() as usize).sum()
    }
}

impl Default for AsidAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlb::{EntryHi, TlbEntry, TlbExceptionState};
    use core::cell::Cell;
    use kernel_memory_addresses::{VirtualAddress, Vpn2};

    #[derive(Default)]
    struct CountingTlb {
        writes: Cell<usize>,
    }

    impl Tlb for CountingTlb {
        fn max_index(&self) -> usize {
            3
        }

        fn write_entries(&self, entries: &[TlbEntry], _first: usize) {
            self.writes.set(self.writes.get() + entries.len());
        }

        fn write_random(&self, _entry: &TlbEntry) {}

        fn probe(&self, _hi: EntryHi) -> Option<usize> {
            None
        }

        fn set_asid(&self, _asid: Asid) {}

        fn exception_state(&self) -> TlbExceptionState {
            TlbExceptionState {
                bad_vaddr: VirtualAddress::zero(),
                bad_vpn2: Vpn2::new(0),
                asid: Asid::KERNEL,
            }
        }
    }

    #[test]
    fn never_hands_out_the_kernel_asid() {
        let tlb = CountingTlb::default();
        let asids = AsidAllocator::new();
        let all: Vec<u8> = (0..255)
            .map(|_| asids.allocate(&tlb).unwrap().as_u8())
            .collect();
        assert_eq!(all, (1..=255).collect::<Vec<u8>>());
        assert_eq!(asids.allocate(&tlb), None);
        assert_eq!(asids.in_use(), 255);
    }

    #[test]
    fn released_asids_wait_for_the_wrap() {
        let tlb = CountingTlb::default();
        let asids = AsidAllocator::new();
        let first = asids.allocate(&tlb).unwrap();
        asids.release(first);

        let second = asids.allocate(&tlb).unwrap();
        assert_ne!(first, second);
        assert_eq!(tlb.writes.get(), 0);
    }

    #[test]
    fn wrapping_flushes_the_tlb() {
        let tlb = CountingTlb::default();
        let asids = AsidAllocator::new();
        for _ in 0..255 {
            let asid = asids.allocate(&tlb).unwrap();
            asids.release(asid);
        }
        assert_eq!(tlb.writes.get(), 4);
        assert_eq!(asids.allocate(&tlb), Some(Asid::new(1)));
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_panics() {
        let tlb = CountingTlb::default();
        let asids = AsidAllocator::new();
        let asid = asids.allocate(&tlb).unwrap();
        asids.release(asid);
        asids.release(asid);
    }
}
