use std::io::{self, Write};

use chrono::Local;
use log::{set_logger, set_max_level, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};

static LOGGER: Logger = Logger;

pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    set_logger(&LOGGER)?;
    set_max_level(level);
    Ok(())
}

/// Writes warnings and errors to stderr, everything else to stdout.
#[derive(Copy, Clone, Debug)]
pub struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let now = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");

        let level = match record.level() {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };

        let line = format!(
            "[{}] [{} {}:{}] [{}] {}\n",
            now,
            record.target(),
            record.file().unwrap_or("???"),
            record.line().unwrap_or(0),
            level,
            record.args()
        );

        let _ = match record.level() {
            Level::Error | Level::Warn => io::stderr().lock().write_all(line.as_bytes()),
            _ => io::stdout().lock().write_all(line.as_bytes()),
        };
    }

    fn flush(&self) {
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();
    }
}

#[cfg(test)]
mod tests {
    use log::LevelFilter;

    use super::init;
    use crate::Error;

    #[test]
    fn test_init_once() {
        init(LevelFilter::Warn).unwrap();
        assert_eq!(log::max_level(), LevelFilter::Warn);

        let err: Error = init(LevelFilter::Debug).unwrap_err().into();
        assert!(err.to_string().starts_with("failed to initialize logger"));
        assert_eq!(log::max_level(), LevelFilter::Warn);
    }
}
