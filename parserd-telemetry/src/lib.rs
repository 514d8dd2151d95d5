//! Tracing initialisation for the parser daemon.
//!
//! The daemon logs through `tracing`; this crate wires the subscriber to the
//! configured sink: stderr (foreground runs), an append-only log file, or
//! syslog under a configurable facility. The `loglevel` option follows the
//! syslog severity names; the names above `error` have no tracing
//! counterpart and are folded into `error`.

mod writer;

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use parserd_config::shared::{LogLevel, LogSink};
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::writer::SyslogMakeWriter;

/// Errors raised while setting up the log subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log file could not be opened for appending.
    #[error("could not open log file `{path}`")]
    OpenLogFile {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The syslog connection could not be established.
    #[error("could not connect to syslog")]
    Syslog(#[source] syslog::Error),

    /// A global subscriber was already installed.
    #[error("log subscriber already initialized")]
    AlreadyInitialized(#[source] tracing_subscriber::util::TryInitError),
}

/// Maps the syslog-style level names onto tracing level filters.
pub fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Emerg | LogLevel::Alert | LogLevel::Crit | LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Notice | LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
    }
}

/// Installs the global subscriber for the given sink and level.
pub fn init_tracing(sink: &LogSink, level: LogLevel) -> Result<(), TelemetryError> {
    let filter = level_filter(level);

    match sink {
        LogSink::File(path) => {
            let file = open_log_file(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .try_init()
                .map_err(TelemetryError::AlreadyInitialized)
        }
        LogSink::Syslog(facility) => {
            let writer = SyslogMakeWriter::connect(*facility).map_err(TelemetryError::Syslog)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        // Syslog stamps time and origin itself.
                        .without_time()
                        .with_target(false)
                        .with_writer(writer),
                )
                .try_init()
                .map_err(TelemetryError::AlreadyInitialized)
        }
    }
}

fn open_log_file(path: &Path) -> Result<std::fs::File, TelemetryError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| TelemetryError::OpenLogFile {
            path: path.display().to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syslog_only_levels_fold_into_error() {
        assert_eq!(level_filter(LogLevel::Emerg), LevelFilter::ERROR);
        assert_eq!(level_filter(LogLevel::Alert), LevelFilter::ERROR);
        assert_eq!(level_filter(LogLevel::Crit), LevelFilter::ERROR);
        assert_eq!(level_filter(LogLevel::Error), LevelFilter::ERROR);
    }

    #[test]
    fn remaining_levels_map_directly() {
        assert_eq!(level_filter(LogLevel::Warn), LevelFilter::WARN);
        assert_eq!(level_filter(LogLevel::Notice), LevelFilter::INFO);
        assert_eq!(level_filter(LogLevel::Info), LevelFilter::INFO);
        assert_eq!(level_filter(LogLevel::Debug), LevelFilter::DEBUG);
    }
}
