//! User mode.
//!
//! A [`UserProcess`] stands in for the CPU executing a user program: every
//! load and store goes through the simulated TLB and raises the same
//! exceptions the hardware would, and system calls trap into the kernel
//! with the registers set up by the calling convention.

use crate::SimMachine;
use crate::tlb::SimTlb;
use kernel::TrapHandler;
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use kernel_syscall::{INSTRUCTION_SIZE, Sysno, UserContext, fd, registers};
use kernel_vmem::{Asid, PhysMemory};

pub struct UserProcess<'m> {
    machine: &'m SimMachine,
    traps: &'static dyn TrapHandler,
    ctx: UserContext,
}

impl<'m> UserProcess<'m> {
    pub(crate) fn new(machine: &'m SimMachine, traps: &'static dyn TrapHandler, ctx: UserContext) -> Self {
        Self { machine, traps, ctx }
    }

    #[must_use]
    pub const fn context(&self) -> &UserContext {
        &self.ctx
    }

    #[must_use]
    pub const fn sp(&self) -> u32 {
        self.ctx.reg(registers::SP)
    }

    /// The ASID the kernel installed for this process.
    #[must_use]
    pub fn asid(&self) -> Asid {
        SimTlb::current_asid()
    }

    /// Executes a `syscall` instruction and returns `v0`.
    ///
    /// # Panics
    /// Panics if the kernel does not resume after the instruction.
    pub fn syscall(&mut self, sysno: u32, a1: u32, a2: u32, a3: u32) -> i32 {
        self.ctx.set_reg(registers::A0, sysno);
        self.ctx.set_reg(registers::A1, a1);
        self.ctx.set_reg(registers::A2, a2);
        self.ctx.set_reg(registers::A3, a3);
        let pc = self.ctx.pc;
        self.traps.syscall(&mut self.ctx);
        assert_eq!(self.ctx.pc, pc + INSTRUCTION_SIZE, "syscall did not advance pc");
        self.ctx.return_value()
    }

    pub fn exec(&mut self, name: &str) -> i32 {
        let path = self.push_str(name);
        self.syscall(Sysno::Exec.into(), path, 0, 0)
    }

    pub fn join(&mut self, pid: i32) -> i32 {
        self.syscall(Sysno::Join.into(), pid.cast_unsigned(), 0, 0)
    }

    pub fn memlimit(&mut self, end: u32) -> i32 {
        self.syscall(Sysno::MemLimit.into(), end, 0, 0)
    }

    /// Writes `bytes`, staged on the stack, to `handle`.
    pub fn write(&mut self, handle: u32, bytes: &[u8]) -> i32 {
        let buf = self.push(bytes);
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        self.syscall(Sysno::Write.into(), handle, buf, len)
    }

    pub fn print(&mut self, text: &str) -> i32 {
        self.write(fd::STDOUT, text.as_bytes())
    }

    /// Reads up to `len` bytes from `handle` into a stack buffer.
    pub fn read(&mut self, handle: u32, len: u32) -> (i32, Vec<u8>) {
        let buf = self.push(&vec![0; len as usize]);
        let got = self.syscall(Sysno::Read.into(), handle, buf, len);
        let data = usize::try_from(got).map_or_else(|_| Vec::new(), |n| self.load(buf, n));
        (got, data)
    }

    /// # Panics
    /// Panics if the kernel returns from `exit`.
    pub fn exit(&mut self, code: i32) -> ! {
        self.syscall(Sysno::Exit.into(), code.cast_unsigned(), 0, 0);
        panic!("exit({code}) returned to user mode");
    }

    /// # Panics
    /// Panics if the kernel returns from `halt`.
    pub fn halt(&mut self) -> ! {
        self.syscall(Sysno::Halt.into(), 0, 0, 0);
        panic!("halt returned to user mode");
    }

    /// Moves the stack pointer down past `bytes` and stores them there.
    pub fn push(&mut self, bytes: &[u8]) -> u32 {
        let len = u32::try_from(bytes.len().next_multiple_of(4)).unwrap_or(u32::MAX);
        let sp = self.sp() - len;
        self.ctx.set_reg(registers::SP, sp);
        self.store(sp, bytes);
        sp
    }

    /// Pushes `text` with a terminating NUL.
    pub fn push_str(&mut self, text: &str) -> u32 {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.push(&bytes)
    }

    pub fn load(&mut self, va: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                let pa = self.translate(at(va, i), false);
                let mut byte = [0];
                PhysMemory::read(self.machine, pa, &mut byte);
                byte[0]
            })
            .collect()
    }

    pub fn store(&mut self, va: u32, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            let pa = self.translate(at(va, i), true);
            PhysMemory::write(self.machine, pa, core::slice::from_ref(byte));
        }
    }

    /// A big-endian word, like the simulated CPU.
    pub fn load_word(&mut self, va: u32) -> u32 {
        let bytes = self.load(va, 4);
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn store_word(&mut self, va: u32, value: u32) {
        self.store(va, &value.to_be_bytes());
    }

    /// Translates `va` the way the MMU does, trapping into the kernel on a
    /// miss and retrying once after the handler returns.
    fn translate(&mut self, va: VirtualAddress, store: bool) -> PhysicalAddress {
        assert!(va.is_user(), "address error at {va} in user mode");
        for attempt in 0..2 {
            if let Some(lo) = self.machine.tlb().lookup(va).filter(|lo| lo.valid()) {
                if store && !lo.dirty() {
                    SimTlb::raise(va);
                    self.traps.tlb_modified();
                    panic!("store to read-only page {va} resumed");
                }
                return lo.frame().join(va.offset::<Size4K>());
            }
            if attempt == 0 {
                SimTlb::raise(va);
                if store {
                    self.traps.tlb_store();
                } else {
                    self.traps.tlb_load();
                }
            }
        }
        panic!("TLB miss on {va} persists after refill");
    }
}

fn at(base: u32, offset: usize) -> VirtualAddress {
    VirtualAddress::new(base.wrapping_add(u32::try_from(offset).unwrap_or(u32::MAX)))
}
