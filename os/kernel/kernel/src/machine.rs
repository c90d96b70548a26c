//! # Collaborators
//!
//! Everything the kernel core needs from the machine, the scheduler and the
//! device drivers. A platform implements all of these on one type; the
//! blanket [`Machine`] trait bundles them.

use crate::process::ProcessId;
use alloc::boxed::Box;
use kernel_console::Console;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::{Platform, ThreadId};
use kernel_syscall::UserContext;
use kernel_vmem::{AddressSpace, FrameAlloc, PhysMemory, Tlb};

/// Per-thread state the kernel keeps in the scheduler's thread table.
#[derive(Debug, Default)]
pub struct ThreadInfo {
    /// The process this thread runs, or `None` for a pure kernel thread.
    pub process_id: Option<ProcessId>,
    /// The page table of that process, installed by `start`.
    pub address_space: Option<AddressSpace>,
}

/// Thread creation and the thread table.
pub trait Threads {
    /// Creates a thread that runs `entry` once it is made runnable with
    /// [`run`](Self::run). Returns `None` if the thread table is full.
    fn create_thread(&self, entry: Box<dyn FnOnce() + Send + 'static>) -> Option<ThreadId>;

    /// Makes a created thread runnable.
    fn run(&self, thread: ThreadId);

    /// Terminates the calling thread.
    fn finish_current(&self) -> !;

    /// Runs `f` on the calling thread's info.
    fn with_current<R>(&self, f: impl FnOnce(&mut ThreadInfo) -> R) -> R;

    /// Runs `f` on another thread's info; `None` if there is no such thread.
    fn with_thread<R>(&self, thread: ThreadId, f: impl FnOnce(&mut ThreadInfo) -> R) -> Option<R>;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ImageError {
    #[error("no such executable")]
    NotFound,
    #[error("malformed executable header")]
    Malformed,
    #[error("short read at offset {0:#x}")]
    ShortRead(u32),
}

/// One loadable segment of an executable.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Segment {
    /// Page-aligned load address.
    pub vaddr: VirtualAddress,
    /// Bytes stored in the file.
    pub size: u32,
    /// Pages to map; may exceed what `size` needs (e.g. for `.bss`).
    pub pages: u32,
    /// File offset of the contents.
    pub location: u32,
}

impl Segment {
    /// First address past the mapped pages.
    #[must_use]
    pub const fn end(&self) -> Option<VirtualAddress> {
        match self.pages.checked_mul(kernel_info::memory::PAGE_SIZE) {
            Some(len) => self.vaddr.checked_add(len),
            None => None,
        }
    }
}

/// What the kernel needs to know about an executable to load it.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct ExecutableInfo {
    pub entry: VirtualAddress,
    /// Text and read-only data.
    pub ro: Segment,
    /// Initialized data and `.bss`.
    pub rw: Segment,
}

/// The executable file store and header parser.
pub trait ImageLoader {
    type File;

    /// # Errors
    /// [`ImageError::NotFound`] if `name` does not exist.
    fn open(&self, name: &str) -> Result<Self::File, ImageError>;

    /// Parses the executable header of `file`.
    ///
    /// # Errors
    /// [`ImageError::Malformed`] if it is not a loadable executable.
    fn header(&self, file: &mut Self::File) -> Result<ExecutableInfo, ImageError>;

    /// Reads from `offset` into `buf`, returning the number of bytes read.
    ///
    /// # Errors
    /// Any I/O error of the store.
    fn read_at(&self, file: &mut Self::File, offset: u32, buf: &mut [u8]) -> Result<usize, ImageError>;
}

/// Exception entry points the kernel installs for user mode.
///
/// The methods take `&'static self` because handlers may start threads that
/// outlive the trap.
pub trait TrapHandler: Sync {
    /// A `syscall` instruction; `ctx` is the saved user state.
    fn syscall(&'static self, ctx: &mut UserContext);

    /// TLB miss on a load or instruction fetch.
    fn tlb_load(&'static self);

    /// TLB miss on a store.
    fn tlb_store(&'static self);

    /// Store to a page whose dirty bit is clear.
    fn tlb_modified(&'static self);
}

/// The switch to user mode.
pub trait UserMode {
    /// Drops to user mode with the registers in `ctx`. Exceptions raised by
    /// the user program are delivered to `traps`.
    fn enter_userland(&self, ctx: UserContext, traps: &'static dyn TrapHandler) -> !;
}

pub trait Power {
    /// Powers the machine off.
    fn halt(&self) -> !;
}

/// All collaborators of the kernel.
pub trait Machine:
    Platform
    + Threads
    + Tlb
    + FrameAlloc
    + PhysMemory
    + ImageLoader
    + UserMode
    + Console
    + Power
    + Send
    + Sync
    + 'static
{
}

impl<T> Machine for T where
    T: Platform
        + Threads
        + Tlb
        + FrameAlloc
        + PhysMemory
        + ImageLoader
        + UserMode
        + Console
        + Power
        + Send
        + Sync
        + 'static
{
}
