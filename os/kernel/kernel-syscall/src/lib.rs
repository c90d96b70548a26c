//! # System Call ABI
//!
//! Userland enters the kernel with the `syscall` instruction. The calling
//! convention follows the o32 register names:
//!
//! | Register | Use                          |
//! |----------|------------------------------|
//! | `a0`     | syscall number ([`Sysno`])   |
//! | `a1..a3` | arguments                    |
//! | `v0`     | return value                 |
//!
//! The saved `pc` points at the `syscall` instruction itself; the kernel
//! advances it by one instruction before returning to userland.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod errno;
pub mod registers;

/// File handles understood by `read` and `write`.
pub mod fd {
    pub const STDIN: u32 = 0;
    pub const STDOUT: u32 = 1;
    pub const STDERR: u32 = 2;
}

pub use crate::errno::{EINVAL, ENOMEM, ENOSYS};

/// System call numbers.
#[repr(u32)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Sysno {
    /// Power the machine off.
    Halt = 0x001,
    /// Start a child process from an executable name.
    Exec = 0x101,
    /// Terminate the calling process.
    Exit = 0x102,
    /// Wait for a child process and collect its exit code.
    Join = 0x103,
    /// Query or move the end of the heap.
    MemLimit = 0x105,
    /// Read from a file handle (the console).
    Read = 0x204,
    /// Write to a file handle (the console).
    Write = 0x205,
}

/// An `a0` value that names no system call.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
#[error("unknown system call {0:#05x}")]
pub struct SysnoError(pub u32);

impl TryFrom<u32> for Sysno {
    type Error = SysnoError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0x001 => Self::Halt,
            0x101 => Self::Exec,
            0x102 => Self::Exit,
            0x103 => Self::Join,
            0x105 => Self::MemLimit,
            0x204 => Self::Read,
            0x205 => Self::Write,
            other => return Err(SysnoError(other)),
        })
    }
}

impl From<Sysno> for u32 {
    fn from(value: Sysno) -> Self {
        value as Self
    }
}

/// Size of one instruction; the step applied to `pc` after a syscall.
pub const INSTRUCTION_SIZE: u32 = 4;

/// User register state saved on kernel entry.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
#[repr(C)]
pub struct UserContext {
    pub cpu_regs: [u32; 32],
    pub pc: u32,
}

impl UserContext {
    /// A fresh context that starts executing at `pc` with stack pointer `sp`.
    #[must_use]
    pub fn new(pc: u32, sp: u32) -> Self {
        let mut ctx = Self {
            cpu_regs: [0; 32],
            pc,
        };
        ctx.cpu_regs[registers::SP] = sp;
        ctx
    }

    #[inline]
    #[must_use]
    pub const fn reg(&self, reg: usize) -> u32 {
        self.cpu_regs[reg]
    }

    /// Sets `reg`; writes to `zero` are ignored like on the hardware.
    #[inline]
    pub const fn set_reg(&mut self, reg: usize, value: u32) {
        if reg != registers::ZERO {
            self.cpu_regs[reg] = value;
        }
    }

    /// The raw syscall number in `a0`.
    #[must_use]
    pub const fn sysno(&self) -> u32 {
        self.cpu_regs[registers::A0]
    }

    /// Syscall argument `n` (1 to 3), taken from `a1..a3`.
    ///
    /// # Panics
    /// Panics for any other `n`.
    #[must_use]
    pub const fn arg(&self, n: usize) -> u32 {
        assert!(n >= 1 && n <= 3, "syscalls take at most three arguments");
        self.cpu_regs[registers::A0 + n]
    }

    /// Stores a syscall result in `v0`.
    #[inline]
    pub const fn set_return(&mut self, value: i32) {
        self.cpu_regs[registers::V0] = value.cast_unsigned();
    }

    /// The value last stored with [`set_return`](Self::set_return).
    #[inline]
    #[must_use]
    pub const fn return_value(&self) -> i32 {
        self.cpu_regs[registers::V0].cast_signed()
    }

    /// Moves `pc` past the `syscall` instruction.
    #[inline]
    pub const fn advance_pc(&mut self) {
        self.pc = self.pc.wrapping_add(INSTRUCTION_SIZE);
    }
}
