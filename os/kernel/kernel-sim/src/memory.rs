//! Physical memory as a byte vector.

use crate::scheduler::lock;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{Frame, PhysicalAddress};
use std::sync::Mutex;

/// RAM of `frames` pages. Frame 0 is reserved, as it is on the real
/// machine, and never handed out.
pub struct Ram {
    bytes: Mutex<Vec<u8>>,
    frames: Mutex<FrameState>,
}

struct FrameState {
    free: Vec<u32>,
    allocated: Vec<bool>,
}

impl Ram {
    #[must_use]
    pub fn new(frames: u32) -> Self {
        assert!(frames >= 2, "need at least one usable frame");
        Self {
            bytes: Mutex::new(vec![0; (frames * PAGE_SIZE) as usize]),
            frames: Mutex::new(FrameState {
                // Popped from the back, so low frames go first.
                free: (1..frames).rev().collect(),
                allocated: vec![false; frames as usize],
            }),
        }
    }

    pub fn alloc(&self) -> Option<Frame> {
        let mut state = lock(&self.frames);
        let number = state.free.pop()?;
        state.allocated[number as usize] = true;
        Some(Frame::from_number(number))
    }

    /// # Panics
    /// Panics on a frame that is not allocated.
    pub fn free(&self, frame: Frame) {
        let mut state = lock(&self.frames);
        let number = frame.number();
        assert!(
            state.allocated.get(number as usize).copied().unwrap_or(false),
            "freeing unallocated frame {frame}"
        );
        state.allocated[number as usize] = false;
        state.free.push(number);
    }

    pub fn free_frames(&self) -> usize {
        lock(&self.frames).free.len()
    }

    /// # Panics
    /// Panics if the range is outside of RAM.
    pub fn read(&self, pa: PhysicalAddress, buf: &mut [u8]) {
        let bytes = lock(&self.bytes);
        let start = pa.as_u32() as usize;
        let Some(src) = bytes.get(start..start + buf.len()) else {
            panic!("read of {} bytes at {pa} is outside RAM", buf.len());
        };
        buf.copy_from_slice(src);
    }

    /// # Panics
    /// Panics if the range is outside of RAM.
    pub fn write(&self, pa: PhysicalAddress, data: &[u8]) {
        let mut bytes = lock(&self.bytes);
        let start = pa.as_u32() as usize;
        let Some(dst) = bytes.get_mut(start..start + data.len()) else {
            panic!("write of {} bytes at {pa} is outside RAM", data.len());
        };
        dst.copy_from_slice(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_zero_is_never_allocated() {
        let ram = Ram::new(3);
        let a = ram.alloc().unwrap();
        let b = ram.alloc().unwrap();
        assert_eq!((a.number(), b.number()), (1, 2));
        assert!(ram.alloc().is_none());

        ram.free(a);
        assert_eq!(ram.free_frames(), 1);
        assert_eq!(ram.alloc(), Some(a));
    }

    #[test]
    #[should_panic(expected = "unallocated")]
    fn double_free_panics() {
        let ram = Ram::new(2);
        let frame = ram.alloc().unwrap();
        ram.free(frame);
        ram.free(frame);
    }

    #[test]
    fn bytes_round_trip() {
        let ram = Ram::new(2);
        ram.write(PhysicalAddress::new(0x1ffe), b"ok");
        let mut buf = [0; 2];
        ram.read(PhysicalAddress::new(0x1ffe), &mut buf);
        assert_eq!(&buf, b"ok");
    }
}
