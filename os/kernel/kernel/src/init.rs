//! # Boot
//!
//! Logging comes up first so everything after it can report through the
//! `log` facade.

use crate::{Kernel, Machine};
use alloc::boxed::Box;
use alloc::sync::Arc;
use kernel_console::{Console, ConsoleLogger};
use log::{LevelFilter, SetLoggerError};

/// Routes the `log` facade to `console`.
///
/// # Errors
/// Fails if a logger is already installed.
pub fn init_logging(console: &'static dyn Console, level: LevelFilter) -> Result<(), SetLoggerError> {
    let logger: &'static ConsoleLogger = Box::leak(Box::new(ConsoleLogger::new(level, console)));
    logger.init()
}

/// Brings up logging on the machine's console and creates the kernel.
///
/// A logger that is already installed is kept.
pub fn boot<M: Machine>(machine: Arc<M>, level: LevelFilter) -> &'static Kernel<M> {
    let leaked: &'static Arc<M> = Box::leak(Box::new(Arc::clone(&machine)));
    let console: &'static M = leaked;
    if init_logging(console, level).is_err() {
        log::debug!("logger already installed");
    }
    log::info!("booting kernel");
    Kernel::new(machine)
}
