use crate::{Console, console_trace};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// A `log::Log` backend writing one line per record to a [`Console`].
pub struct ConsoleLogger {
    max_level: LevelFilter,
    console: &'static dyn Console,
}

impl ConsoleLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter, console: &'static dyn Console) -> Self {
        Self { max_level, console }
    }

    /// Call this once during early init.
    ///
    /// # Errors
    /// Fails if a logger was installed before.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Format: "[LEVEL] target: message\n"
        console_trace!(
            self.console,
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}
