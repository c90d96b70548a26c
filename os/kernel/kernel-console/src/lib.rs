//! # Kernel Console
//!
//! Character output for the kernel's diagnostics and the `read`/`write`
//! system calls. The console device itself lives behind the [`Console`]
//! trait; this crate adds log and trace plumbing on top of it.
//!
//! ## Output Mechanism
//! ```text
//! log::info!(..)            console_trace!(console, ..)
//!     ↓                          ↓
//! ConsoleLogger (log::Log)       │
//!     ↓                          ↓
//! ConsoleSink (fmt::Write) ──────┘
//!     ↓
//! Console::write
//! ```
//!
//! ## Feature System
//!
//! The `enabled` feature (default) compiles the sink in. Without it, the
//! logger and [`console_trace!`] still type-check their arguments but write
//! nothing. [`Console`] itself is unaffected, so the `read`/`write` system
//! calls keep working.
//!
//! ## Usage
//! ```rust,ignore
//! use kernel_console::{ConsoleLogger, console_trace};
//! use log::LevelFilter;
//!
//! static LOGGER: ConsoleLogger = ConsoleLogger::new(LevelFilter::Info, &UART);
//! LOGGER.init().expect("logger initialization");
//!
//! log::info!("scheduler started");
//! console_trace!(&UART, "tlb: {} entries\n", 16);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod logger;

pub use logger::ConsoleLogger;

/// A byte-oriented console device.
pub trait Console: Sync {
    /// Writes `bytes`, returning how many were accepted.
    fn write(&self, bytes: &[u8]) -> usize;

    /// Reads up to `buf.len()` bytes, returning how many were read.
    fn read(&self, buf: &mut [u8]) -> usize;
}

#[cfg(feature = "enabled")]
#[doc(hidden)]
pub mod console_fmt {
    use crate::Console;
    use core::fmt::{self, Write};

    pub struct ConsoleSink<'a>(pub &'a dyn Console);

    impl Write for ConsoleSink<'_> {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            let mut bytes = s.as_bytes();
            while !bytes.is_empty() {
                match self.0.write(bytes) {
                    0 => return Err(fmt::Error),
                    n => bytes = &bytes[n.min(bytes.len())..],
                }
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn console_write(console: &dyn Console, args: fmt::Arguments) {
        // Best effort; a full console drops the rest of the line.
        let _ = ConsoleSink(console).write_fmt(args);
    }
}

#[cfg(not(feature = "enabled"))]
#[doc(hidden)]
pub mod console_fmt {
    use crate::Console;
    use core::fmt;

    #[doc(hidden)]
    #[inline(always)]
    #[allow(clippy::inline_always)]
    pub fn console_write(_: &dyn Console, _: fmt::Arguments) {}
}

/// Formats directly to a [`Console`], bypassing the `log` facade.
#[macro_export]
macro_rules! console_trace {
    ($console:expr, $($arg:tt)*) => {{
        $crate::console_fmt::console_write($console, core::format_args!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Accepts at most three bytes per call.
    #[derive(Default)]
    struct Narrow(Mutex<Vec<u8>>);

    impl Console for Narrow {
        fn write(&self, bytes: &[u8]) -> usize {
            let n = bytes.len().min(3);
            self.0.lock().unwrap().extend_from_slice(&bytes[..n]);
            n
        }

        fn read(&self, _buf: &mut [u8]) -> usize {
            0
        }
    }

    #[test]
    fn trace_writes_everything() {
        let console = Narrow::default();
        console_trace!(&console, "pid {} exited with {}\n", 3, -6);
        assert_eq!(console.0.lock().unwrap().as_slice(), b"pid 3 exited with -6\n");
    }
}
