//! Copying between kernel buffers and user memory.
//!
//! The kernel never dereferences user addresses. Each copy is split at page
//! boundaries, every page is translated through the owning [`AddressSpace`],
//! and the bytes move through [`PhysMemory`].

use super::AddressSpace;
use crate::PhysMemory;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{Size4K, VirtualAddress};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum UserCopyError {
    #[error("user address {0} is not mapped")]
    NotMapped(VirtualAddress),
    #[error("user address {0} is mapped read-only")]
    ReadOnly(VirtualAddress),
    #[error("string is not terminated within {0} bytes")]
    Unterminated(usize),
}

impl AddressSpace {
    /// Calls `f` with each page-sized piece of `[va, va + len)` and its
    /// offset into the whole range.
    fn for_each_chunk(
        &self,
        va: VirtualAddress,
        len: usize,
        writable: bool,
        mut f: impl FnMut(kernel_memory_addresses::PhysicalAddress, usize, usize),
    ) -> Result<(), UserCopyError> {
        let mut done = 0;
        while done < len {
            let offset = u32::try_from(done).map_err(|_| UserCopyError::NotMapped(va))?;
            let at = va.checked_add(offset).ok_or(UserCopyError::NotMapped(va))?;
            if !at.is_user() {
                return Err(UserCopyError::NotMapped(at));
            }

            let pa = self.translate(at).ok_or(UserCopyError::NotMapped(at))?;
            if writable && !self.is_writable(at) {
                return Err(UserCopyError::ReadOnly(at));
            }

            let in_page = (PAGE_SIZE - at.offset::<Size4K>()) as usize;
            let n = in_page.min(len - done);
            f(pa, done, n);
            done += n;
        }
        Ok(())
    }

    /// Writes `bytes` to user memory at `va`.
    ///
    /// Every touched page must be mapped writable. Pages before the first
    /// failing one have already been written when an error is returned.
    ///
    /// # Errors
    /// [`UserCopyError::NotMapped`] or [`UserCopyError::ReadOnly`] for the
    /// first page that cannot be written.
    pub fn copy_to_user<P: PhysMemory + ?Sized>(
        &self,
        mem: &P,
        va: VirtualAddress,
        bytes: &[u8],
    ) -> Result<(), UserCopyError> {
        self.for_each_chunk(va, bytes.len(), true, |pa, at, n| {
            mem.write(pa, &bytes[at..at + n]);
        })
    }

    /// Fills `buf` from user memory at `va`.
    ///
    /// # Errors
    /// [`UserCopyError::NotMapped`] for the first unmapped page.
    pub fn copy_from_user<P: PhysMemory + ?Sized>(
        &self,
        mem: &P,
        va: VirtualAddress,
        buf: &mut [u8],
    ) -> Result<(), UserCopyError> {
        let len = buf.len();
        self.for_each_chunk(va, len, false, |pa, at, n| {
            mem.read(pa, &mut buf[at..at + n]);
        })
    }

    /// Reads a NUL-terminated string at `va` into `buf` and returns it
    /// without the terminator.
    ///
    /// # Errors
    /// [`UserCopyError::Unterminated`] if no NUL appears within `buf.len()`
    /// bytes, [`UserCopyError::NotMapped`] if the string runs into an
    /// unmapped page first.
    pub fn read_cstr<'b, P: PhysMemory + ?Sized>(
        &self,
        mem: &P,
        va: VirtualAddress,
        buf: &'b mut [u8],
    ) -> Result<&'b [u8], UserCopyError> {
        let mut len = 0;
        while len < buf.len() {
            let offset = u32::try_from(len).map_err(|_| UserCopyError::NotMapped(va))?;
            let at = va.checked_add(offset).ok_or(UserCopyError::NotMapped(va))?;
            self.copy_from_user(mem, at, &mut buf[len..=len])?;
            if buf[len] == 0 {
                return Ok(&buf[..len]);
            }
            len += 1;
        }
        Err(UserCopyError::Unterminated(buf.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tlb::Asid;
    use kernel_memory_addresses::{Frame, PhysicalAddress};
    use std::cell::RefCell;

    /// Eight frames of flat memory.
    struct Ram(RefCell<Vec<u8>>);

    impl Ram {
        fn new() -> Self {
            Self(RefCell::new(vec![0; 8 * PAGE_SIZE as usize]))
        }
    }

    impl PhysMemory for Ram {
        fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
            let at = pa.as_u32() as usize;
            buf.copy_from_slice(&self.0.borrow()[at..at + buf.len()]);
        }

        fn write(&self, pa: PhysicalAddress, bytes: &[u8]) {
            let at = pa.as_u32() as usize;
            self.0.borrow_mut()[at..at + bytes.len()].copy_from_slice(bytes);
        }
    }

    fn space() -> AddressSpace {
        let mut space = AddressSpace::new(Asid::new(1));
        // Virtually contiguous, physically out of order.
        space.map(Frame::from_number(5), VirtualAddress::new(0x0040_0000), true);
        space.map(Frame::from_number(2), VirtualAddress::new(0x0040_1000), true);
        space.map(Frame::from_number(3), VirtualAddress::new(0x0040_2000), false);
        space
    }

    #[test]
    fn copies_across_page_boundaries() {
        let ram = Ram::new();
        let space = space();
        let va = VirtualAddress::new(0x0040_0ffe);

        space.copy_to_user(&ram, va, b"abcd").unwrap();
        assert_eq!(&ram.0.borrow()[0x5ffe..0x6000], b"ab");
        assert_eq!(&ram.0.borrow()[0x2000..0x2002], b"cd");

        let mut back = [0; 4];
        space.copy_from_user(&ram, va, &mut back).unwrap();
        assert_eq!(&back, b"abcd");
    }

    #[test]
    fn read_only_pages_refuse_writes() {
        let ram = Ram::new();
        let space = space();
        assert_eq!(
            space.copy_to_user(&ram, VirtualAddress::new(0x0040_1fff), b"xy"),
            Err(UserCopyError::ReadOnly(VirtualAddress::new(0x0040_2000)))
        );
        let mut buf = [0; 2];
        assert!(space.copy_from_user(&ram, VirtualAddress::new(0x0040_1fff), &mut buf).is_ok());
    }

    #[test]
    fn unmapped_pages_are_reported() {
        let ram = Ram::new();
        let space = space();
        let mut buf = [0; 8];
        assert_eq!(
            space.copy_from_user(&ram, VirtualAddress::new(0x0040_2ffc), &mut buf),
            Err(UserCopyError::NotMapped(VirtualAddress::new(0x0040_3000)))
        );
        assert_eq!(
            space.copy_from_user(&ram, VirtualAddress::KSEG0, &mut buf),
            Err(UserCopyError::NotMapped(VirtualAddress::KSEG0))
        );
    }

    #[test]
    fn strings_stop_at_nul() {
        let ram = Ram::new();
        let space = space();
        space.copy_to_user(&ram, VirtualAddress::new(0x0040_0010), b"init\0junk").unwrap();

        let mut buf = [0; 33];
        let name = space.read_cstr(&ram, VirtualAddress::new(0x0040_0010), &mut buf).unwrap();
        assert_eq!(name, b"init");

        let mut short = [0; 3];
        assert_eq!(
            space.read_cstr(&ram, VirtualAddress::new(0x0040_0010), &mut short),
            Err(UserCopyError::Unterminated(3))
        );
    }
}
