use core::sync::atomic::{AtomicBool, Ordering};
use loader_trace::debug_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Logs to the debug sink, and to the firmware console while boot services last.
pub struct UefiLogger {
    max_level: LevelFilter,
    console: AtomicBool,
}

impl UefiLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self {
            max_level,
            console: AtomicBool::new(true),
        }
    }

    /// Installs the logger. Call this once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed before.
    pub fn init(&'static self) -> Result<(), SetLoggerError> {
        log::set_logger(self)?;
        log::set_max_level(self.max_level);
        Ok(())
    }

    /// Stops mirroring to the console. Must happen before boot services go away.
    pub fn exit_boot_services(&self) {
        self.console.store(false, Ordering::Release);
    }

    pub fn boot_services_available(&self) -> bool {
        self.console.load(Ordering::Acquire)
    }
}

impl Log for UefiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        debug_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );

        if self.boot_services_available() {
            uefi::println!(
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}
