//! Spawn, start, join and finish.

use super::table::{ExecutableName, JoinPoll, Parent};
use super::{JoinError, ProcessId, SpawnError};
use crate::machine::{ExecutableInfo, ImageLoader, Segment};
use crate::{Kernel, Machine};
use alloc::boxed::Box;
use kernel_info::memory::{PAGE_SIZE, USERLAND_MIN_ADDRESS, USERLAND_STACK_PAGES, USERLAND_STACK_TOP};
use kernel_memory_addresses::{Size4K, VirtualAddress};
use kernel_sync::ResourceId;
use kernel_syscall::UserContext;
use kernel_vmem::{AddressSpace, FrameAlloc, PhysMemory, tlb};

/// Chunk size for copying segments from the image into user pages.
const LOAD_CHUNK: usize = 512;

impl<M: Machine> Kernel<M> {
    /// Starts `name` as a child of the calling process in a new thread.
    ///
    /// A kernel thread may spawn too; any kernel thread can then join the
    /// new process. Loading happens in the new thread, so a missing or
    /// broken executable is only detected there.
    ///
    /// # Errors
    /// [`SpawnError`] if no slot or thread is available or `name` is too
    /// long.
    pub fn spawn(&'static self, name: &str) -> Result<ProcessId, SpawnError> {
        let name = ExecutableName::new(name)?;
        let parent = Parent::of(self.current_process());
        let pid = self.processes.lock(self.machine()).claim(name, parent)?;

        let Some(thread) = self.machine.create_thread(Box::new(move || {
            self.start(pid);
        })) else {
            log::warn!("no thread for process {pid} ({name})");
            self.processes.lock(self.machine()).release(pid);
            return Err(SpawnError::NoThread);
        };

        self.machine
            .with_thread(thread, |info| info.process_id = Some(pid));
        log::info!("spawned process {pid} ({name}) in thread {thread}, parent {parent:?}");
        self.machine.run(thread);
        Ok(pid)
    }

    /// Turns the calling kernel thread into the first user process.
    ///
    /// The process has no parent and its slot is freed when it exits.
    ///
    /// # Panics
    /// Panics if `name` cannot be started; see [`spawn`](Self::spawn).
    pub fn run_init(&'static self, name: &str) -> ! {
        let claimed = ExecutableName::new(name)
            .and_then(|name| self.processes.lock(self.machine()).claim(name, Parent::Detached));
        let pid = match claimed {
            Ok(pid) => pid,
            Err(e) => {
                log::error!("cannot start init process {name}: {e}");
                panic!("init process {name} not started: {e}");
            }
        };

        self.machine.with_current(|info| info.process_id = Some(pid));
        log::info!("starting init process {pid} ({name})");
        self.start(pid)
    }

    /// Loads the executable of `pid` into a fresh address space and enters
    /// user mode. Runs in the thread created for the process.
    ///
    /// Loading failures are fatal.
    fn start(&'static self, pid: ProcessId) -> ! {
        let name = self.processes.snapshot(self.machine(), pid).name;
        assert!(
            self.machine.with_current(|info| info.address_space.is_none()),
            "thread already runs a user process"
        );

        let mut file = match self.machine.open(name.as_str()) {
            Ok(file) => file,
            Err(e) => fatal(pid, &name, e),
        };
        let image = match self.machine.header(&mut file) {
            Ok(image) => image,
            Err(e) => fatal(pid, &name, e),
        };
        check_image(&image, kernel_vmem::tlb::capacity(self.machine()));

        let Some(asid) = self.asids.allocate(self.machine()) else {
            fatal(pid, &name, "out of ASIDs")
        };
        let mut space = AddressSpace::new(asid);

        let stack_top = USERLAND_STACK_TOP.align_down::<Size4K>();
        for i in 0..USERLAND_STACK_PAGES {
            let page = VirtualAddress::new(stack_top.as_u32() - i * PAGE_SIZE);
            self.map_fresh(&mut space, page, true, pid);
        }
        for segment in [image.ro, image.rw] {
            for i in 0..segment.pages {
                self.map_fresh(&mut space, segment.vaddr + i * PAGE_SIZE, true, pid);
            }
        }

        for segment in [image.ro, image.rw] {
            if let Err(e) = self.load_segment(&mut file, &space, &segment) {
                fatal(pid, &name, e);
            }
        }
        for i in 0..image.ro.pages {
            // Mapped above.
            let _ = space.set_dirty(image.ro.vaddr + i * PAGE_SIZE, false);
        }

        let heap_start = [image.ro, image.rw]
            .iter()
            .filter_map(Segment::end)
            .max()
            .unwrap_or(USERLAND_MIN_ADDRESS);
        {
            let mut slots = self.processes.lock(self.machine());
            slots[pid].heap_start = heap_start;
            slots[pid].heap_end = heap_start;
        }

        {
            let _irq = kernel_sync::IrqGuard::new(self.machine());
            kernel_vmem::fill(self.machine(), &space);
        }
        log::info!(
            "process {pid} ({name}) loaded: entry {}, {} TLB entries, ASID {asid}",
            image.entry,
            space.valid_count()
        );

        self.machine
            .with_current(|info| info.address_space = Some(space));
        let ctx = UserContext::new(image.entry.as_u32(), USERLAND_STACK_TOP.as_u32());
        self.machine.enter_userland(ctx, self)
    }

    /// Maps a zeroed frame at `va`.
    fn map_fresh(&self, space: &mut AddressSpace, va: VirtualAddress, dirty: bool, pid: ProcessId) {
        let Some(frame) = self.machine.alloc_4k() else {
            log::error!("out of physical pages while starting process {pid}");
            panic!("no physical page for {va} of process {pid}");
        };
        self.machine.fill(frame, 0);
        space.map(frame, va, dirty);
    }

    /// Copies the file contents of `segment` into its pages.
    fn load_segment(
        &self,
        file: &mut <M as ImageLoader>::File,
        space: &AddressSpace,
        segment: &Segment,
    ) -> Result<(), LoadError> {
        let mut buf = [0u8; LOAD_CHUNK];
        let mut done = 0u32;
        while done < segment.size {
            let want = LOAD_CHUNK.min((segment.size - done) as usize);
            let read = self
                .machine
                .read_at(file, segment.location + done, &mut buf[..want])?;
            if read != want {
                return Err(LoadError::Image(crate::ImageError::ShortRead(segment.location + done)));
            }
            space.copy_to_user(self.machine(), segment.vaddr + done, &buf[..want])?;
            #[allow(clippy::cast_possible_truncation)]
            let step = want as u32;
            done += step;
        }
        Ok(())
    }

    /// Waits for the child `target` to finish and returns its exit code.
    ///
    /// Blocks while the child runs. There is no timeout.
    ///
    /// # Errors
    /// A [`JoinError`] if the caller may not join `target`.
    pub fn join(&self, target: i32) -> Result<i32, JoinError> {
        let caller = self.current_process();
        let mut slots = self.processes.lock(self.machine());
        loop {
            match slots.poll_join(caller, target) {
                Ok(JoinPoll::Exited(code)) => {
                    drop(slots);
                    log::info!("joined process {target}, exit code {code}");
                    return Ok(code);
                }
                Ok(JoinPoll::Running(pid)) => {
                    log::trace!("waiting for process {pid}");
                    let resource = ResourceId::of(&slots[pid]);
                    let (guard, irq) = slots.into_parts();
                    self.sleepq.sleep_on(resource, guard);
                    drop(irq);
                    slots = self.processes.lock(self.machine());
                }
                Err(e) => {
                    log::debug!("join {target} refused: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// Ends the calling process with `exit_code` and terminates its thread.
    ///
    /// The address space is torn down first; then the process becomes a
    /// zombie (or is freed if nobody can join it) and its joiners are woken.
    /// Called from a kernel thread, this only ends the thread.
    pub fn finish(&self, exit_code: i32) -> ! {
        let (pid, space) = self
            .machine
            .with_current(|info| (info.process_id.take(), info.address_space.take()));

        if let Some(space) = space {
            let asid = space.asid();
            {
                let _irq = kernel_sync::IrqGuard::new(self.machine());
                kernel_vmem::unload(self.machine(), &space);
            }
            let frames = space.destroy(self.machine());
            self.asids.release(asid);
            log::debug!("released {frames} frames and ASID {asid}");
        }

        if let Some(pid) = pid {
            let mut slots = self.processes.lock(self.machine());
            let retired = slots.retire(pid, exit_code);
            let woken = self.sleepq.wake_all(ResourceId::of(&slots[pid]));
            drop(slots);
            log::info!(
                "process {pid} finished with {exit_code}: {woken} joiners woken, {} children reaped, {} orphaned{}",
                retired.reaped,
                retired.orphaned,
                if retired.freed { ", slot freed" } else { "" }
            );
        }

        self.machine.finish_current()
    }
}

#[derive(Debug, thiserror::Error)]
enum LoadError {
    #[error(transparent)]
    Image(#[from] crate::ImageError),
    #[error(transparent)]
    Copy(#[from] kernel_vmem::UserCopyError),
}

/// Sanity checks on an image before anything is allocated for it.
fn check_image(image: &ExecutableInfo, tlb_slots: usize) {
    assert!(
        image.entry >= USERLAND_MIN_ADDRESS && image.entry.is_user(),
        "entry point {} outside user space",
        image.entry
    );
    for segment in [image.ro, image.rw] {
        if segment.pages > 0 {
            assert!(
                segment.vaddr >= USERLAND_MIN_ADDRESS && segment.vaddr.is_aligned::<Size4K>(),
                "segment at {} is not a user page",
                segment.vaddr
            );
            assert!(
                segment.end().is_some_and(VirtualAddress::is_user),
                "segment at {} runs into kernel space",
                segment.vaddr
            );
        }
        assert!(
            segment.size <= segment.pages * PAGE_SIZE,
            "segment at {} is larger than its pages",
            segment.vaddr
        );
    }

    // Without demand paging, every page must be resident at once. Pages
    // count towards the TLB individually; entries hold pairs.
    let pages = (image.ro.pages + image.rw.pages + USERLAND_STACK_PAGES) as usize;
    assert!(
        pages <= tlb_slots,
        "image needs {pages} pages, the TLB holds {tlb_slots}"
    );
}

fn fatal(pid: ProcessId, name: &ExecutableName, error: impl core::fmt::Display) -> ! {
    log::error!("cannot start process {pid} ({name}): {error}");
    panic!("process {pid} ({name}) failed to start: {error}");
}
