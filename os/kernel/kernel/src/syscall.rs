//! # System Call Decoder
//!
//! Unpacks the trapped [`UserContext`], calls into the process and console
//! code and stores the result in `v0`. Failures are returned to userland as
//! negative codes; only `halt`, `exit` and invalid kernel state stop the
//! calling thread.

use crate::process::{JoinError, MemLimitError, SpawnError};
use crate::{Kernel, Machine};
use kernel_console::Console;
use kernel_info::process::MAX_FILE_NAME;
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::{EINVAL, ENOSYS, Sysno, SysnoError, UserContext, fd};
use kernel_vmem::UserCopyError;

/// Bytes moved per step between user memory and the console.
const CONSOLE_CHUNK: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SyscallError {
    #[error(transparent)]
    Unsupported(#[from] SysnoError),
    #[error("bad user buffer: {0}")]
    BadBuffer(#[from] UserCopyError),
    #[error("executable name is not valid UTF-8")]
    BadName,
    #[error("bad file handle {0}")]
    BadHandle(u32),
    #[error("system call from a kernel thread")]
    KernelThread,
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error(transparent)]
    MemLimit(#[from] MemLimitError),
}

impl SyscallError {
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Unsupported(_) => ENOSYS,
            Self::BadBuffer(_) | Self::BadName | Self::BadHandle(_) | Self::KernelThread => EINVAL,
            Self::Spawn(e) => e.code(),
            Self::Join(e) => e.code(),
            Self::MemLimit(e) => e.code(),
        }
    }
}

impl<M: Machine> Kernel<M> {
    /// Executes the system call described by `ctx` and resumes after it.
    pub fn handle_syscall(&'static self, ctx: &mut UserContext) {
        let result = match self.dispatch(ctx) {
            Ok(value) => value,
            Err(e) => {
                log::debug!("syscall {:#05x} failed: {e}", ctx.sysno());
                e.code()
            }
        };
        ctx.set_return(result);
        ctx.advance_pc();
    }

    fn dispatch(&'static self, ctx: &UserContext) -> Result<i32, SyscallError> {
        let (a1, a2, a3) = (ctx.arg(1), ctx.arg(2), ctx.arg(3));
        match Sysno::try_from(ctx.sysno())? {
            Sysno::Halt => {
                log::info!("halt requested by process {:?}", self.current_process());
                self.machine.halt()
            }
            Sysno::Exec => self.sys_exec(VirtualAddress::new(a1)),
            Sysno::Exit => self.finish(a1.cast_signed()),
            Sysno::Join => Ok(self.join(a1.cast_signed())?),
            Sysno::MemLimit => {
                let end = self.memlimit(VirtualAddress::new(a1))?;
                Ok(end.as_u32().cast_signed())
            }
            Sysno::Read => self.sys_read(a1, VirtualAddress::new(a2), a3),
            Sysno::Write => self.sys_write(a1, VirtualAddress::new(a2), a3),
        }
    }

    fn sys_exec(&'static self, path: VirtualAddress) -> Result<i32, SyscallError> {
        let mut buf = [0u8; MAX_FILE_NAME + 1];
        let len = self
            .with_address_space(|space| {
                space
                    .read_cstr(self.machine(), path, &mut buf)
                    .map(<[u8]>::len)
            })
            .ok_or(SyscallError::KernelThread)??;

        let name = core::str::from_utf8(&buf[..len]).map_err(|_| SyscallError::BadName)?;
        Ok(self.spawn(name)?.as_i32())
    }

    fn sys_write(&self, handle: u32, buf: VirtualAddress, len: u32) -> Result<i32, SyscallError> {
        if handle != fd::STDOUT && handle != fd::STDERR {
            return Err(SyscallError::BadHandle(handle));
        }

        self.with_address_space(|space| -> Result<i32, SyscallError> {
            let mut written = 0usize;
            let mut chunk = [0u8; CONSOLE_CHUNK];
            let len = len.min(i32::MAX.cast_unsigned()) as usize;
            while written < len {
                let want = CONSOLE_CHUNK.min(len - written);
                let at = offset(buf, written).ok_or(UserCopyError::NotMapped(buf))?;
                space.copy_from_user(self.machine(), at, &mut chunk[..want])?;

                let text = chunk[..want].split(|&b| b == 0).next().unwrap_or_default();
                written += Console::write(self.machine(), text);
                if text.len() < want {
                    break;
                }
            }
            Ok(count(written))
        })
        .ok_or(SyscallError::KernelThread)?
    }

    fn sys_read(&self, handle: u32, buf: VirtualAddress, len: u32) -> Result<i32, SyscallError> {
        if handle != fd::STDIN {
            return Err(SyscallError::BadHandle(handle));
        }

        self.with_address_space(|space| -> Result<i32, SyscallError> {
            let mut read = 0usize;
            let mut chunk = [0u8; CONSOLE_CHUNK];
            let len = len.min(i32::MAX.cast_unsigned()) as usize;
            while read < len {
                let want = CONSOLE_CHUNK.min(len - read);
                let got = Console::read(self.machine(), &mut chunk[..want]).min(want);
                let at = offset(buf, read).ok_or(UserCopyError::NotMapped(buf))?;
                space.copy_to_user(self.machine(), at, &chunk[..got])?;
                read += got;
                if got < want {
                    break;
                }
            }
            Ok(count(read))
        })
        .ok_or(SyscallError::KernelThread)?
    }
}

fn offset(base: VirtualAddress, by: usize) -> Option<VirtualAddress> {
    base.checked_add(u32::try_from(by).ok()?)
}

fn count(bytes: usize) -> i32 {
    i32::try_from(bytes).unwrap_or(i32::MAX)
}
