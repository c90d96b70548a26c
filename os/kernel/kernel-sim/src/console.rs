//! The serial console: captured output and scripted input.

use crate::scheduler::lock;
use kernel_console::Console;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Default)]
pub struct SimConsole {
    output: Mutex<Vec<u8>>,
    input: Mutex<VecDeque<u8>>,
}

impl SimConsole {
    /// Everything written so far, lossily decoded.
    #[must_use]
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&lock(&self.output)).into_owned()
    }

    /// Queues `bytes` to be read.
    pub fn type_in(&self, bytes: &[u8]) {
        lock(&self.input).extend(bytes);
    }
}

impl Console for SimConsole {
    fn write(&self, bytes: &[u8]) -> usize {
        lock(&self.output).extend_from_slice(bytes);
        bytes.len()
    }

    /// Returns what is queued, up to `buf.len()` bytes, without waiting.
    fn read(&self, buf: &mut [u8]) -> usize {
        let mut input = lock(&self.input);
        let n = buf.len().min(input.len());
        for (dst, src) in buf.iter_mut().zip(input.drain(..n)) {
            *dst = src;
        }
        n
    }
}

/// A console on the test harness's stderr, for kernel logs.
#[derive(Debug, Copy, Clone, Default)]
pub struct StderrConsole;

impl Console for StderrConsole {
    fn write(&self, bytes: &[u8]) -> usize {
        eprint!("{}", String::from_utf8_lossy(bytes));
        bytes.len()
    }

    fn read(&self, _buf: &mut [u8]) -> usize {
        0
    }
}
