//! # Processes
//!
//! A process occupies one slot of the [`ProcessTable`]; its [`ProcessId`] is
//! the slot index. Slots move through
//!
//! ```text
//! Free ──spawn──► Running ──finish──► Zombie ──join──► Free
//!                    │                   ▲
//!                    └── finish, no ─────┘ (skipped: slot is freed directly)
//!                        parent
//! ```
//!
//! and are only reused after the zombie has been joined. Error values map to
//! the negative codes the corresponding system calls return.

mod lifecycle;
mod memlimit;
mod table;

pub use table::{ExecutableName, Parent, Pcb, ProcessState, ProcessTable, Slots};

use core::fmt;
use kernel_info::process::PROCESS_MAX_PROCESSES;
use kernel_syscall::{EINVAL, ENOMEM};

/// Exit code of a process killed for writing to a read-only page.
pub const EXIT_WRITE_PROTECTED: i32 = -6;

/// Index of a process in the process table.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessId(u8);

const _: () = assert!(PROCESS_MAX_PROCESSES <= u8::MAX as usize);

impl ProcessId {
    /// # Panics
    /// Panics if `index` is not a valid table index.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn new(index: usize) -> Self {
        assert!(index < PROCESS_MAX_PROCESSES, "process id out of range");
        Self(index as u8)
    }

    /// The id a system call argument names, if it is in range.
    #[must_use]
    pub fn from_raw(raw: i32) -> Option<Self> {
        usize::try_from(raw)
            .ok()
            .filter(|&index| index < PROCESS_MAX_PROCESSES)
            .map(Self::new)
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SpawnError {
    #[error("process table is full")]
    TableFull,
    #[error("executable name is longer than {} bytes", kernel_info::process::MAX_FILE_NAME)]
    NameTooLong,
    #[error("no thread available for the new process")]
    NoThread,
}

impl SpawnError {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::TableFull => -1,
            Self::NameTooLong => EINVAL,
            Self::NoThread => -11,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum JoinError {
    #[error("process id {0} is out of range")]
    OutOfRange(i32),
    #[error("no process with id {0}")]
    NoSuchProcess(ProcessId),
    #[error("a process cannot join itself")]
    SelfJoin,
    #[error("process {0} is not a child of the caller")]
    NotChild(ProcessId),
}

impl JoinError {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::OutOfRange(_) => -1,
            Self::NoSuchProcess(_) => -2,
            Self::SelfJoin => -3,
            Self::NotChild(_) => -4,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MemLimitError {
    #[error("heap end {0:#x} is outside the heap")]
    InvalidAddress(u32),
    #[error("out of physical memory")]
    OutOfMemory,
    #[error("page table is full")]
    AddressSpaceFull,
    #[error("caller is not a process")]
    NotAProcess,
}

impl MemLimitError {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidAddress(_) | Self::NotAProcess => EINVAL,
            Self::OutOfMemory | Self::AddressSpaceFull => ENOMEM,
        }
    }
}
