//! # Kernel Simulator
//!
//! A [`Machine`](kernel::Machine) built from host threads and plain memory,
//! for running the kernel core in tests.
//!
//! * Every kernel thread is a host thread; blocking parks it. See
//!   [`scheduler`].
//! * The TLB has the hardware's sixteen slots and matching rules; the ASID
//!   and exception registers are per thread.
//! * Executables are [`Image`]s whose "code" is a Rust closure driving a
//!   [`UserProcess`]. Every memory access of that closure is translated
//!   through the TLB and may trap into the kernel.
//! * A kernel panic does not abort the test: it ends the thread and is
//!   recorded as a [`Halt`].
//!
//! ```no_run
//! use kernel::Kernel;
//! use kernel_sim::{Image, SimMachine};
//!
//! let machine = SimMachine::new();
//! machine.install("hello", Image::new(|p| p.print("hi\n")));
//! let kernel = Kernel::new(machine.clone());
//! let pid = kernel.spawn("hello").unwrap();
//! assert_eq!(kernel.join(pid.as_i32()), Ok(3));
//! assert_eq!(machine.console().output(), "hi\n");
//! ```

mod console;
mod images;
mod memory;
pub mod scheduler;
mod tlb;
mod user;

pub use crate::console::{SimConsole, StderrConsole};
pub use crate::images::{Image, Program, SimFile, TEXT_BASE};
pub use crate::memory::Ram;
pub use crate::scheduler::HostScheduler;
pub use crate::tlb::SimTlb;
pub use crate::user::UserProcess;

use crate::scheduler::lock;
use kernel::{
    ExecutableInfo, ImageError, ImageLoader, Power, ThreadInfo, Threads, TrapHandler, UserMode,
};
use kernel_console::Console;
use kernel_memory_addresses::{Frame, PhysicalAddress};
use kernel_sync::{InterruptState, Interrupts, Scheduler, ThreadId};
use kernel_syscall::UserContext;
use kernel_vmem::{Asid, EntryHi, FrameAlloc, PhysMemory, Tlb, TlbEntry, TlbExceptionState};
use log::LevelFilter;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};

/// Unwinding payload of a thread that finished normally.
struct ThreadExit;

/// Why the machine stopped.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Halt {
    /// The `halt` system call.
    PowerOff,
    /// A kernel panic in `thread`.
    Panic { thread: ThreadId, message: String },
}

impl Halt {
    #[must_use]
    pub fn is_panic_containing(&self, text: &str) -> bool {
        matches!(self, Self::Panic { message, .. } if message.contains(text))
    }
}

#[derive(Debug, Copy, Clone)]
pub struct SimConfig {
    /// Physical frames, including the reserved frame 0.
    pub frames: u32,
    /// Kernel threads that may exist at once.
    pub max_threads: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frames: 256,
            max_threads: 64,
        }
    }
}

#[derive(Default)]
struct Status {
    halt: Option<Halt>,
    live_threads: usize,
}

pub struct SimMachine {
    me: Weak<Self>,
    config: SimConfig,
    tlb: SimTlb,
    ram: Ram,
    console: SimConsole,
    images: Mutex<BTreeMap<String, Arc<Image>>>,
    threads: Mutex<BTreeMap<ThreadId, ThreadInfo>>,
    status: Mutex<Status>,
    changed: Condvar,
}

impl SimMachine {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Self::with_config(SimConfig::default())
    }

    #[must_use]
    pub fn with_config(config: SimConfig) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            config,
            tlb: SimTlb::new(),
            ram: Ram::new(config.frames),
            console: SimConsole::default(),
            images: Mutex::new(BTreeMap::new()),
            threads: Mutex::new(BTreeMap::new()),
            status: Mutex::new(Status::default()),
            changed: Condvar::new(),
        })
    }

    /// Puts `image` on the disk under `name`.
    pub fn install(&self, name: &str, image: Image) {
        lock(&self.images).insert(name.to_owned(), Arc::new(image));
    }

    #[must_use]
    pub const fn console(&self) -> &SimConsole {
        &self.console
    }

    #[must_use]
    pub const fn tlb(&self) -> &SimTlb {
        &self.tlb
    }

    /// The first reason the machine stopped, if it did.
    #[must_use]
    pub fn halted(&self) -> Option<Halt> {
        lock(&self.status).halt.clone()
    }

    /// Waits until the machine halts or `timeout` passes.
    #[must_use]
    pub fn wait_for_halt(&self, timeout: Duration) -> Option<Halt> {
        self.wait(timeout, |status| status.halt.is_some())
            .and_then(|status| status.halt)
    }

    /// Waits until every kernel thread has ended; `false` on timeout.
    #[must_use]
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.wait(timeout, |status| status.live_threads == 0).is_some()
    }

    #[must_use]
    pub fn live_threads(&self) -> usize {
        lock(&self.status).live_threads
    }

    fn wait(&self, timeout: Duration, done: impl Fn(&Status) -> bool) -> Option<Status> {
        let deadline = Instant::now() + timeout;
        let mut status = lock(&self.status);
        while !done(&status) {
            let left = deadline.checked_duration_since(Instant::now())?;
            status = self
                .changed
                .wait_timeout(status, left)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Some(Status {
            halt: status.halt.clone(),
            live_threads: status.live_threads,
        })
    }

    fn record_halt(&self, halt: Halt) {
        let mut status = lock(&self.status);
        if status.halt.is_none() {
            log::warn!("machine halted: {halt:?}");
            status.halt = Some(halt);
        }
        self.changed.notify_all();
    }

    fn thread_ended(&self, id: ThreadId, outcome: Result<(), Box<dyn Any + Send>>) {
        lock(&self.threads).remove(&id);
        if let Err(payload) = outcome
            && !payload.is::<ThreadExit>()
        {
            self.record_halt(Halt::Panic {
                thread: id,
                message: panic_message(payload.as_ref()),
            });
        }
        let mut status = lock(&self.status);
        status.live_threads -= 1;
        self.changed.notify_all();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic".to_owned())
}

/// Sends kernel logs to the test harness's stderr. Only the first call in a
/// process has an effect.
pub fn init_test_logging(level: LevelFilter) {
    let _ = kernel::init::init_logging(&StderrConsole, level);
}

impl Scheduler for SimMachine {
    fn current_thread(&self) -> ThreadId {
        HostScheduler.current_thread()
    }

    fn block_current(&self) {
        HostScheduler.block_current();
    }

    fn wake(&self, thread: ThreadId) {
        HostScheduler.wake(thread);
    }
}

impl Interrupts for SimMachine {
    fn disable(&self) -> InterruptState {
        HostScheduler.disable()
    }

    fn restore(&self, state: InterruptState) {
        HostScheduler.restore(state);
    }

    fn are_enabled(&self) -> bool {
        HostScheduler.are_enabled()
    }
}

impl Threads for SimMachine {
    fn create_thread(&self, entry: Box<dyn FnOnce() + Send + 'static>) -> Option<ThreadId> {
        {
            let mut status = lock(&self.status);
            if status.live_threads >= self.config.max_threads {
                return None;
            }
            status.live_threads += 1;
        }

        let id = scheduler::reserve();
        lock(&self.threads).insert(id, ThreadInfo::default());
        let me = self.me.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("kthread-{id}"))
            .spawn(move || {
                scheduler::adopt(id);
                // Runnable only after `run`.
                HostScheduler.block_current();
                let outcome = panic::catch_unwind(AssertUnwindSafe(entry));
                if let Some(machine) = me.upgrade() {
                    machine.thread_ended(id, outcome);
                }
            });

        match spawned {
            Ok(_) => Some(id),
            Err(e) => {
                log::warn!("cannot spawn host thread: {e}");
                self.thread_ended(id, Ok(()));
                None
            }
        }
    }

    fn run(&self, thread: ThreadId) {
        HostScheduler.wake(thread);
    }

    fn finish_current(&self) -> ! {
        panic::resume_unwind(Box::new(ThreadExit))
    }

    fn with_current<R>(&self, f: impl FnOnce(&mut ThreadInfo) -> R) -> R {
        let id = HostScheduler.current_thread();
        f(lock(&self.threads).entry(id).or_default())
    }

    fn with_thread<R>(&self, thread: ThreadId, f: impl FnOnce(&mut ThreadInfo) -> R) -> Option<R> {
        lock(&self.threads).get_mut(&thread).map(f)
    }
}

impl Tlb for SimMachine {
    fn max_index(&self) -> usize {
        self.tlb.max_index()
    }

    fn write_entries(&self, entries: &[TlbEntry], first: usize) {
        self.tlb.write_entries(entries, first);
    }

    fn write_random(&self, entry: &TlbEntry) {
        self.tlb.write_random(entry);
    }

    fn probe(&self, hi: EntryHi) -> Option<usize> {
        self.tlb.probe(hi)
    }

    fn set_asid(&self, asid: Asid) {
        self.tlb.set_asid(asid);
    }

    fn exception_state(&self) -> TlbExceptionState {
        self.tlb.exception_state()
    }
}

impl FrameAlloc for SimMachine {
    fn alloc_4k(&self) -> Option<Frame> {
        self.ram.alloc()
    }

    fn free_4k(&self, frame: Frame) {
        self.ram.free(frame);
    }

    fn free_frames(&self) -> usize {
        self.ram.free_frames()
    }
}

impl PhysMemory for SimMachine {
    fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        self.ram.read(pa, buf);
    }

    fn write(&self, pa: PhysicalAddress, bytes: &[u8]) {
        self.ram.write(pa, bytes);
    }
}

impl ImageLoader for SimMachine {
    type File = SimFile;

    fn open(&self, name: &str) -> Result<SimFile, ImageError> {
        lock(&self.images)
            .get(name)
            .map(|image| SimFile {
                image: Arc::clone(image),
            })
            .ok_or(ImageError::NotFound)
    }

    fn header(&self, file: &mut SimFile) -> Result<ExecutableInfo, ImageError> {
        file.image.header()
    }

    fn read_at(&self, file: &mut SimFile, offset: u32, buf: &mut [u8]) -> Result<usize, ImageError> {
        Ok(file.image.read_at(offset, buf))
    }
}

impl UserMode for SimMachine {
    fn enter_userland(&self, ctx: UserContext, traps: &'static dyn TrapHandler) -> ! {
        let Some(program) = images::take_loaded() else {
            panic!("entering user mode without a loaded image");
        };
        let mut process = UserProcess::new(self, traps, ctx);
        let code = program(&mut process);
        process.exit(code)
    }
}

impl Console for SimMachine {
    fn write(&self, bytes: &[u8]) -> usize {
        self.console.write(bytes)
    }

    fn read(&self, buf: &mut [u8]) -> usize {
        self.console.read(buf)
    }
}

impl Power for SimMachine {
    fn halt(&self) -> ! {
        self.record_halt(Halt::PowerOff);
        self.finish_current()
    }
}
