use super::{JoinError, ProcessId, SpawnError};
use core::fmt;
use core::ops::{Index, IndexMut};
use kernel_info::process::{MAX_FILE_NAME, PROCESS_MAX_PROCESSES};
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::{Interrupts, IrqSpinLockGuard, SpinLock};

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum ProcessState {
    #[default]
    Free,
    /// Spawned and not yet finished; covers ready, running and blocked.
    Running,
    /// Finished, exit code not yet collected.
    Zombie,
}

/// Who may join a process.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum Parent {
    /// Spawned by a kernel thread; any kernel thread may join it.
    Kernel,
    Process(ProcessId),
    /// Nobody: the init process, or one whose parent has finished. Its slot
    /// is freed as soon as it finishes.
    #[default]
    Detached,
}

impl Parent {
    /// The parent a process spawned by `caller` gets.
    #[must_use]
    pub const fn of(caller: Option<ProcessId>) -> Self {
        match caller {
            Some(pid) => Self::Process(pid),
            None => Self::Kernel,
        }
    }
}

/// A bounded executable name.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ExecutableName {
    bytes: [u8; MAX_FILE_NAME],
    len: u8,
}

const _: () = assert!(MAX_FILE_NAME <= u8::MAX as usize);

impl ExecutableName {
    pub const EMPTY: Self = Self {
        bytes: [0; MAX_FILE_NAME],
        len: 0,
    };

    /// # Errors
    /// [`SpawnError::NameTooLong`] for names over `MAX_FILE_NAME` bytes.
    pub fn new(name: &str) -> Result<Self, SpawnError> {
        let len = u8::try_from(name.len()).map_err(|_| SpawnError::NameTooLong)?;
        if name.len() > MAX_FILE_NAME {
            return Err(SpawnError::NameTooLong);
        }
        let mut bytes = [0; MAX_FILE_NAME];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(Self { bytes, len })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        // Built from a `&str`, so always valid.
        core::str::from_utf8(&self.bytes[..usize::from(self.len)]).unwrap_or_default()
    }
}

impl Default for ExecutableName {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl fmt::Debug for ExecutableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.as_str(), f)
    }
}

impl fmt::Display for ExecutableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process control block.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Pcb {
    pub state: ProcessState,
    pub name: ExecutableName,
    /// Valid once the process is a zombie.
    pub exit_code: i32,
    pub parent: Parent,
    /// Page-aligned end of the loaded image; the heap cannot shrink below.
    pub heap_start: VirtualAddress,
    /// Current end of the heap as set by `memlimit`.
    pub heap_end: VirtualAddress,
}

impl Pcb {
    pub const FREE: Self = Self {
        state: ProcessState::Free,
        name: ExecutableName::EMPTY,
        exit_code: 0,
        parent: Parent::Detached,
        heap_start: VirtualAddress::zero(),
        heap_end: VirtualAddress::zero(),
    };
}

/// Outcome of a join attempt.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum JoinPoll {
    /// The child had exited with this code; its slot is free again.
    Exited(i32),
    /// The child is still running.
    Running(ProcessId),
}

/// Bookkeeping done by [`Slots::retire`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Retired {
    /// The slot was freed right away because nobody can join it.
    pub freed: bool,
    /// Zombie children that were reclaimed.
    pub reaped: usize,
    /// Running children that became detached.
    pub orphaned: usize,
}

/// The process table contents, accessed under the table lock.
pub struct Slots([Pcb; PROCESS_MAX_PROCESSES]);

impl Slots {
    #[must_use]
    pub const fn new() -> Self {
        Self([Pcb::FREE; PROCESS_MAX_PROCESSES])
    }

    /// Takes the lowest free slot for a new running process.
    ///
    /// # Errors
    /// [`SpawnError::TableFull`] if every slot is in use.
    pub fn claim(&mut self, name: ExecutableName, parent: Parent) -> Result<ProcessId, SpawnError> {
        let index = self
            .0
            .iter()
            .position(|pcb| pcb.state == ProcessState::Free)
            .ok_or(SpawnError::TableFull)?;

        self.0[index] = Pcb {
            state: ProcessState::Running,
            name,
            parent,
            ..Pcb::FREE
        };
        Ok(ProcessId::new(index))
    }

    /// Returns a slot to the free pool.
    pub fn release(&mut self, pid: ProcessId) {
        self[pid] = Pcb::FREE;
    }

    /// Checks whether `caller` may join `target` and collects its exit code
    /// if it has finished.
    ///
    /// # Errors
    /// The [`JoinError`] that forbids the join; checked in the order self,
    /// range, existence, parentage.
    pub fn poll_join(&mut self, caller: Option<ProcessId>, target: i32) -> Result<JoinPoll, JoinError> {
        if caller.is_some_and(|me| me.as_i32() == target) {
            return Err(JoinError::SelfJoin);
        }
        let pid = ProcessId::from_raw(target).ok_or(JoinError::OutOfRange(target))?;

        let pcb = self[pid];
        if pcb.state == ProcessState::Free {
            return Err(JoinError::NoSuchProcess(pid));
        }
        if pcb.parent != Parent::of(caller) {
            return Err(JoinError::NotChild(pid));
        }

        match pcb.state {
            ProcessState::Zombie => {
                self.release(pid);
                Ok(JoinPoll::Exited(pcb.exit_code))
            }
            _ => Ok(JoinPoll::Running(pid)),
        }
    }

    /// Marks `pid` as finished with `exit_code`.
    ///
    /// A detached process is freed at once, others become zombies. Zombie
    /// children of `pid` are reclaimed and running children are detached.
    pub fn retire(&mut self, pid: ProcessId, exit_code: i32) -> Retired {
        let mut retired = Retired::default();

        if self[pid].parent == Parent::Detached {
            self.release(pid);
            retired.freed = true;
        } else {
            let pcb = &mut self[pid];
            pcb.state = ProcessState::Zombie;
            pcb.exit_code = exit_code;
        }

        for child in self.0.iter_mut().filter(|c| c.parent == Parent::Process(pid)) {
            match child.state {
                ProcessState::Zombie => {
                    *child = Pcb::FREE;
                    retired.reaped += 1;
                }
                ProcessState::Running => {
                    child.parent = Parent::Detached;
                    retired.orphaned += 1;
                }
                ProcessState::Free => {}
            }
        }
        retired
    }

    /// Number of slots in `state`.
    #[must_use]
    pub fn count(&self, state: ProcessState) -> usize {
        self.0.iter().filter(|pcb| pcb.state == state).count()
    }
}

impl Default for Slots {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<ProcessId> for Slots {
    type Output = Pcb;

    fn index(&self, pid: ProcessId) -> &Pcb {
        &self.0[pid.index()]
    }
}

impl IndexMut<ProcessId> for Slots {
    fn index_mut(&mut self, pid: ProcessId) -> &mut Pcb {
        &mut self.0[pid.index()]
    }
}

/// The process table and its lock.
pub struct ProcessTable {
    slots: SpinLock<Slots>,
}

impl ProcessTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: SpinLock::new(Slots::new()),
        }
    }

    /// Locks the table with interrupts disabled.
    pub fn lock<'a, I: Interrupts + ?Sized>(&'a self, irq: &'a I) -> IrqSpinLockGuard<'a, Slots, I> {
        self.slots.lock_irq(irq)
    }

    /// A copy of the control block of `pid`.
    pub fn snapshot<I: Interrupts + ?Sized>(&self, irq: &I, pid: ProcessId) -> Pcb {
        self.lock(irq)[pid]
    }

    /// Number of slots in `state`.
    pub fn count<I: Interrupts + ?Sized>(&self, irq: &I, state: ProcessState) -> usize {
        self.lock(irq).count(state)
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> ExecutableName {
        ExecutableName::new(s).unwrap()
    }

    #[test]
    fn names_are_bounded() {
        assert_eq!(name("shell").as_str(), "shell");
        assert!(ExecutableName::new(&"x".repeat(MAX_FILE_NAME)).is_ok());
        assert_eq!(
            ExecutableName::new(&"x".repeat(MAX_FILE_NAME + 1)),
            Err(SpawnError::NameTooLong)
        );
    }

    #[test]
    fn claims_lowest_free_slot() {
        let mut slots = Slots::new();
        let a = slots.claim(name("a"), Parent::Kernel).unwrap();
        let b = slots.claim(name("b"), Parent::Kernel).unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));

        slots.release(a);
        assert_eq!(slots.claim(name("c"), Parent::Kernel), Ok(a));
        assert_eq!(slots[a].name.as_str(), "c");
        assert_eq!(slots[a].state, ProcessState::Running);
    }

    #[test]
    fn full_table_is_reported() {
        let mut slots = Slots::new();
        for _ in 0..PROCESS_MAX_PROCESSES {
            slots.claim(name("p"), Parent::Kernel).unwrap();
        }
        assert_eq!(slots.claim(name("p"), Parent::Kernel), Err(SpawnError::TableFull));
    }

    #[test]
    fn join_errors_in_order() {
        let mut slots = Slots::new();
        let parent = slots.claim(name("parent"), Parent::Kernel).unwrap();
        let child = slots.claim(name("child"), Parent::Process(parent)).unwrap();
        let stranger = slots.claim(name("other"), Parent::Kernel).unwrap();

        assert_eq!(slots.poll_join(Some(parent), parent.as_i32()), Err(JoinError::SelfJoin));
        assert_eq!(slots.poll_join(Some(parent), 32), Err(JoinError::OutOfRange(32)));
        assert_eq!(slots.poll_join(Some(parent), -5), Err(JoinError::OutOfRange(-5)));
        assert_eq!(
            slots.poll_join(Some(parent), 20),
            Err(JoinError::NoSuchProcess(ProcessId::new(20)))
        );
        assert_eq!(
            slots.poll_join(Some(parent), stranger.as_i32()),
            Err(JoinError::NotChild(stranger))
        );
        assert_eq!(
            slots.poll_join(Some(parent), child.as_i32()),
            Ok(JoinPoll::Running(child))
        );
        assert_eq!(
            slots.poll_join(None, stranger.as_i32()),
            Ok(JoinPoll::Running(stranger))
        );
    }

    #[test]
    fn zombie_is_reclaimed_once() {
        let mut slots = Slots::new();
        let child = slots.claim(name("child"), Parent::Kernel).unwrap();

        assert_eq!(slots.retire(child, 7), Retired::default());
        assert_eq!(slots[child].state, ProcessState::Zombie);
        assert_eq!(slots.poll_join(None, child.as_i32()), Ok(JoinPoll::Exited(7)));
        assert_eq!(slots[child].state, ProcessState::Free);
        assert_eq!(
            slots.poll_join(None, child.as_i32()),
            Err(JoinError::NoSuchProcess(child))
        );
    }

    #[test]
    fn detached_processes_free_their_slot() {
        let mut slots = Slots::new();
        let init = slots.claim(name("init"), Parent::Detached).unwrap();
        let retired = slots.retire(init, 0);
        assert!(retired.freed);
        assert_eq!(slots[init].state, ProcessState::Free);
    }

    #[test]
    fn finishing_parent_reaps_and_orphans() {
        let mut slots = Slots::new();
        let parent = slots.claim(name("parent"), Parent::Kernel).unwrap();
        let done = slots.claim(name("done"), Parent::Process(parent)).unwrap();
        let busy = slots.claim(name("busy"), Parent::Process(parent)).unwrap();
        slots.retire(done, 1);

        let retired = slots.retire(parent, 0);
        assert_eq!(
            retired,
            Retired {
                freed: false,
                reaped: 1,
                orphaned: 1
            }
        );
        assert_eq!(slots[done].state, ProcessState::Free);
        assert_eq!(slots[busy].parent, Parent::Detached);

        // The orphan frees itself.
        assert!(slots.retire(busy, 3).freed);
        assert_eq!(slots.count(ProcessState::Free), PROCESS_MAX_PROCESSES - 1);
    }
}
