use crate::debug_trace;
use core::fmt::Write;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// Reports a failed logger installation on `console`. The loader boots on
/// either way; only its log output is lost.
///
/// Returns whether the logger is installed.
pub fn report_install<W: Write + ?Sized>(installed: Result<(), SetLoggerError>, console: &mut W) -> bool {
    match installed {
        Ok(()) => true,
        Err(e) => {
            let _ = writeln!(console, "BOOTBOOT: booting without a logger: {e}");
            false
        }
    }
}

/// A [`Log`] implementation that writes `[LEVEL] target: message` lines to the debug sink.
pub struct TraceLogger {
    max_level: LevelFilter,
}

impl TraceLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    /// Installs the logger. Call this once during early init.
    ///
    /// # Errors
    /// Fails if another logger was installed before.
    #[allow(static_mut_refs)]
    pub fn init(self) -> Result<(), SetLoggerError> {
        static mut LOGGER: Option<TraceLogger> = None;

        let max_level = self.max_level;
        // SAFETY: single-threaded boot; the static is written once before it is shared.
        unsafe {
            LOGGER = Some(self);
            if let Some(logger) = LOGGER.as_ref() {
                log::set_logger(logger)?;
            }
        }
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for TraceLogger {
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
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn filters_by_level() {
        let logger = TraceLogger::new(LevelFilter::Info);
        let info = Metadata::builder().level(Level::Info).build();
        let debug = Metadata::builder().level(Level::Debug).build();
        assert!(logger.enabled(&info));
        assert!(!logger.enabled(&debug));
    }

    #[test]
    fn second_installation_is_reported_on_the_console() {
        static QUIET: TraceLogger = TraceLogger::new(LevelFilter::Off);
        let _ = log::set_logger(&QUIET);

        let mut console = String::new();
        assert!(!report_install(log::set_logger(&QUIET), &mut console));
        assert!(console.starts_with("BOOTBOOT: booting without a logger"));
        assert!(console.ends_with('\n'));

        let mut console = String::new();
        assert!(report_install(Ok(()), &mut console));
        assert!(console.is_empty());
    }
}
