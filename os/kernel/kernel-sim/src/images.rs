//! Executables the simulated disk holds.
//!
//! An image is a pair of segments plus the program that "runs" once the
//! kernel has loaded it: a Rust closure that drives a [`UserProcess`].

use crate::UserProcess;
use kernel::{ExecutableInfo, ImageError, Segment};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::VirtualAddress;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

/// The code of a user program. Its return value is passed to `exit`.
pub type Program = Arc<dyn Fn(&mut UserProcess<'_>) -> i32 + Send + Sync>;

/// Default load address of the read-only segment.
pub const TEXT_BASE: VirtualAddress = VirtualAddress::new(0x0040_0000);

thread_local! {
    /// The program of the last image whose header this thread read.
    static LOADED: RefCell<Option<Program>> = const { RefCell::new(None) };
}

pub(crate) fn take_loaded() -> Option<Program> {
    LOADED.take()
}

#[derive(Clone)]
pub struct Image {
    ro: Vec<u8>,
    rw: Vec<u8>,
    ro_pages: u32,
    rw_pages: u32,
    entry: Option<VirtualAddress>,
    malformed: bool,
    program: Program,
}

impl Image {
    /// One page of text and one page of data, both empty.
    pub fn new(program: impl Fn(&mut UserProcess<'_>) -> i32 + Send + Sync + 'static) -> Self {
        Self {
            ro: Vec::new(),
            rw: Vec::new(),
            ro_pages: 1,
            rw_pages: 1,
            entry: None,
            malformed: false,
            program: Arc::new(program),
        }
    }

    /// An image whose header does not parse.
    #[must_use]
    pub fn malformed() -> Self {
        Self {
            malformed: true,
            ..Self::new(|_| 0)
        }
    }

    /// Read-only contents; grows the segment to fit.
    #[must_use]
    pub fn text(mut self, bytes: &[u8]) -> Self {
        self.ro = bytes.to_vec();
        self.ro_pages = self.ro_pages.max(pages_for(bytes.len()));
        self
    }

    /// Initialized data; grows the segment to fit.
    #[must_use]
    pub fn data(mut self, bytes: &[u8]) -> Self {
        self.rw = bytes.to_vec();
        self.rw_pages = self.rw_pages.max(pages_for(bytes.len()));
        self
    }

    /// Total pages of the read-write segment, including `.bss`.
    #[must_use]
    pub const fn data_pages(mut self, pages: u32) -> Self {
        self.rw_pages = pages;
        self
    }

    #[must_use]
    pub const fn text_pages(mut self, pages: u32) -> Self {
        self.ro_pages = pages;
        self
    }

    #[must_use]
    pub const fn entry(mut self, entry: VirtualAddress) -> Self {
        self.entry = Some(entry);
        self
    }

    /// Where the read-write segment is loaded.
    #[must_use]
    pub fn data_base(&self) -> VirtualAddress {
        TEXT_BASE + self.ro_pages * PAGE_SIZE
    }

    /// First address past both segments, where the heap starts.
    #[must_use]
    pub fn heap_start(&self) -> VirtualAddress {
        self.data_base() + self.rw_pages * PAGE_SIZE
    }

    pub(crate) fn header(&self) -> Result<ExecutableInfo, ImageError> {
        if self.malformed {
            return Err(ImageError::Malformed);
        }
        LOADED.set(Some(Arc::clone(&self.program)));
        Ok(ExecutableInfo {
            entry: self.entry.unwrap_or(TEXT_BASE),
            ro: Segment {
                vaddr: TEXT_BASE,
                size: len(&self.ro),
                pages: self.ro_pages,
                location: 0,
            },
            rw: Segment {
                vaddr: self.data_base(),
                size: len(&self.rw),
                pages: self.rw_pages,
                location: len(&self.ro),
            },
        })
    }

    /// Reads the file: text followed by data.
    pub(crate) fn read_at(&self, offset: u32, buf: &mut [u8]) -> usize {
        let file = self.ro.iter().chain(&self.rw).skip(offset as usize);
        let mut read = 0;
        for (dst, src) in buf.iter_mut().zip(file) {
            *dst = *src;
            read += 1;
        }
        read
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("ro", &(self.ro.len(), self.ro_pages))
            .field("rw", &(self.rw.len(), self.rw_pages))
            .field("entry", &self.entry)
            .field("malformed", &self.malformed)
            .finish_non_exhaustive()
    }
}

/// An open executable.
#[derive(Debug)]
pub struct SimFile {
    pub(crate) image: Arc<Image>,
}

fn len(bytes: &[u8]) -> u32 {
    u32::try_from(bytes.len()).unwrap_or(u32::MAX)
}

fn pages_for(bytes: usize) -> u32 {
    u32::try_from(bytes.div_ceil(PAGE_SIZE as usize)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_is_text_then_data() {
        let image = Image::new(|_| 0).text(b"abc").data(b"de");
        let mut buf = [0; 8];
        assert_eq!(image.read_at(1, &mut buf), 4);
        assert_eq!(&buf[..4], b"bcde");

        let info = image.header().unwrap();
        assert_eq!(info.rw.location, 3);
        assert_eq!(info.rw.vaddr, VirtualAddress::new(0x0040_1000));
        assert_eq!(image.heap_start(), VirtualAddress::new(0x0040_2000));
    }

    #[test]
    fn large_contents_grow_the_segment() {
        let image = Image::new(|_| 0).data(&[1; 5000]);
        assert_eq!(image.header().unwrap().rw.pages, 2);
    }
}
