use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Error raised when the `log` or `loglevel` option cannot be parsed.
#[derive(Debug, Error)]
pub enum ParseLogOptionError {
    /// The syslog facility name is not one of the recognized facilities.
    #[error("unknown syslog facility `{0}`")]
    UnknownFacility(String),
    /// The log sink is neither a `syslog:<facility>` value nor an absolute path.
    #[error("log sink `{0}` is neither `syslog:<facility>` nor an absolute path")]
    InvalidSink(String),
    /// The log level name is not recognized.
    #[error("unknown log level `{0}`")]
    UnknownLevel(String),
}

/// Syslog facility a log sink can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyslogFacility {
    Daemon,
    User,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

impl SyslogFacility {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyslogFacility::Daemon => "daemon",
            SyslogFacility::User => "user",
            SyslogFacility::Local0 => "local0",
            SyslogFacility::Local1 => "local1",
            SyslogFacility::Local2 => "local2",
            SyslogFacility::Local3 => "local3",
            SyslogFacility::Local4 => "local4",
            SyslogFacility::Local5 => "local5",
            SyslogFacility::Local6 => "local6",
            SyslogFacility::Local7 => "local7",
        }
    }
}

impl FromStr for SyslogFacility {
    type Err = ParseLogOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "daemon" => Ok(SyslogFacility::Daemon),
            "user" => Ok(SyslogFacility::User),
            "local0" => Ok(SyslogFacility::Local0),
            "local1" => Ok(SyslogFacility::Local1),
            "local2" => Ok(SyslogFacility::Local2),
            "local3" => Ok(SyslogFacility::Local3),
            "local4" => Ok(SyslogFacility::Local4),
            "local5" => Ok(SyslogFacility::Local5),
            "local6" => Ok(SyslogFacility::Local6),
            "local7" => Ok(SyslogFacility::Local7),
            other => Err(ParseLogOptionError::UnknownFacility(other.to_string())),
        }
    }
}

impl fmt::Display for SyslogFacility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for the daemon's log output.
///
/// The `log` option accepts either `syslog:<facility>` or an absolute
/// filesystem path. The default sink is `syslog:daemon`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSink {
    /// Forward log records to syslog under the given facility.
    Syslog(SyslogFacility),
    /// Append log records to the file at the given absolute path.
    File(PathBuf),
}

impl Default for LogSink {
    fn default() -> Self {
        LogSink::Syslog(SyslogFacility::Daemon)
    }
}

impl FromStr for LogSink {
    type Err = ParseLogOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(facility) = s.strip_prefix("syslog:") {
            return Ok(LogSink::Syslog(facility.parse()?));
        }
        if s == "syslog" {
            return Ok(LogSink::Syslog(SyslogFacility::Daemon));
        }

        let path = PathBuf::from(s);
        if path.is_absolute() {
            Ok(LogSink::File(path))
        } else {
            Err(ParseLogOptionError::InvalidSink(s.to_string()))
        }
    }
}

impl fmt::Display for LogSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogSink::Syslog(facility) => write!(f, "syslog:{facility}"),
            LogSink::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Log verbosity threshold, named after the syslog severities.
///
/// `emerg`, `alert` and `crit` exist for option compatibility and are folded
/// into the most severe level the log backend distinguishes; `notice` is
/// folded into `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Emerg,
    Alert,
    Crit,
    Error,
    Warn,
    Notice,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Emerg => "emerg",
            LogLevel::Alert => "alert",
            LogLevel::Crit => "crit",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Notice => "notice",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ParseLogOptionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emerg" => Ok(LogLevel::Emerg),
            "alert" => Ok(LogLevel::Alert),
            "crit" => Ok(LogLevel::Crit),
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "notice" => Ok(LogLevel::Notice),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            other => Err(ParseLogOptionError::UnknownLevel(other.to_string())),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_syslog_sinks() {
        assert_eq!(
            "syslog:daemon".parse::<LogSink>().unwrap(),
            LogSink::Syslog(SyslogFacility::Daemon)
        );
        assert_eq!(
            "syslog:local3".parse::<LogSink>().unwrap(),
            LogSink::Syslog(SyslogFacility::Local3)
        );
        assert_eq!(
            "syslog".parse::<LogSink>().unwrap(),
            LogSink::Syslog(SyslogFacility::Daemon)
        );
    }

    #[test]
    fn parses_file_sink() {
        assert_eq!(
            "/var/log/rteval-parserd.log".parse::<LogSink>().unwrap(),
            LogSink::File(PathBuf::from("/var/log/rteval-parserd.log"))
        );
    }

    #[test]
    fn rejects_relative_path_and_unknown_facility() {
        assert!("logs/daemon.log".parse::<LogSink>().is_err());
        assert!("syslog:mail".parse::<LogSink>().is_err());
    }

    #[test]
    fn parses_all_level_names() {
        for name in [
            "emerg", "alert", "crit", "error", "warn", "notice", "info", "debug",
        ] {
            assert_eq!(name.parse::<LogLevel>().unwrap().as_str(), name);
        }
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
