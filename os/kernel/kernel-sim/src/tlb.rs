//! A software TLB with the same matching rules as the R3000 one.
//!
//! The slots are shared by all threads, like the single hardware TLB they
//! model. The ASID register and the exception registers belong to the CPU
//! state of a thread and are kept per host thread.

use crate::scheduler::lock;
use kernel_info::memory::TLB_ENTRIES;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{Asid, EntryHi, EntryLo, Tlb, TlbEntry, TlbExceptionState};
use std::cell::Cell;
use std::sync::Mutex;

thread_local! {
    static ASID: Cell<Asid> = const { Cell::new(Asid::KERNEL) };
    static EXCEPTION: Cell<Option<TlbExceptionState>> = const { Cell::new(None) };
}

pub struct SimTlb {
    state: Mutex<TlbState>,
}

struct TlbState {
    slots: Vec<TlbEntry>,
    random: usize,
}

impl SimTlb {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TlbState {
                slots: (0..TLB_ENTRIES).map(TlbEntry::unused).collect(),
                random: 0,
            }),
        }
    }

    /// The half of the entry that translates `va` under the calling thread's
    /// ASID, if a slot matches.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<EntryLo> {
        let asid = ASID.get();
        let state = lock(&self.state);
        let mut matching = state.slots.iter().filter(|e| e.matches(va.vpn2(), asid));
        let entry = matching.next()?;
        assert!(
            matching.next().is_none(),
            "two TLB entries match {va} (ASID {asid})"
        );
        Some(entry.half(va))
    }

    /// Records a fault at `va` for the next exception handler.
    pub fn raise(va: VirtualAddress) {
        EXCEPTION.set(Some(TlbExceptionState {
            bad_vaddr: va,
            bad_vpn2: va.vpn2(),
            asid: ASID.get(),
        }));
    }

    #[must_use]
    pub fn current_asid() -> Asid {
        ASID.get()
    }

    /// A copy of every slot.
    #[must_use]
    pub fn slots(&self) -> Vec<TlbEntry> {
        lock(&self.state).slots.clone()
    }
}

impl Default for SimTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl Tlb for SimTlb {
    fn max_index(&self) -> usize {
        TLB_ENTRIES - 1
    }

    fn write_entries(&self, entries: &[TlbEntry], first: usize) {
        let mut state = lock(&self.state);
        let Some(slots) = state.slots.get_mut(first..first + entries.len()) else {
            panic!("TLB write of {} entries at slot {first}", entries.len());
        };
        slots.copy_from_slice(entries);
    }

    fn write_random(&self, entry: &TlbEntry) {
        let mut state = lock(&self.state);
        let slot = state.random;
        state.random = (slot + 1) % state.slots.len();
        state.slots[slot] = *entry;
    }

    fn probe(&self, hi: EntryHi) -> Option<usize> {
        lock(&self.state).slots.iter().position(|e| e.hi == hi)
    }

    fn set_asid(&self, asid: Asid) {
        ASID.set(asid);
    }

    fn exception_state(&self) -> TlbExceptionState {
        match EXCEPTION.get() {
            Some(state) => state,
            None => panic!("no TLB exception pending"),
        }
    }
}
