use std::path::PathBuf;

use clap::Parser;
use parserd_config::shared::{LogLevel, LogSink};

fn parse_log_sink(value: &str) -> Result<LogSink, String> {
    value.parse().map_err(|err| format!("{err}"))
}

fn parse_log_level(value: &str) -> Result<LogLevel, String> {
    value.parse().map_err(|err| format!("{err}"))
}

/// Command line options of the parser daemon.
///
/// The stylesheet and report directory paths come from the configuration
/// file, not from the command line.
#[derive(Debug, Parser)]
#[command(name = "rteval-parserd", version, about = "rteval submission queue parser daemon")]
pub struct Cli {
    /// Number of worker threads; defaults to one per CPU core
    #[arg(short = 't', long = "num-threads")]
    pub num_threads: Option<usize>,

    /// Log sink: `syslog:<facility>` or an absolute file path
    #[arg(long, default_value = "syslog:daemon", value_parser = parse_log_sink)]
    pub log: LogSink,

    /// Log level (emerg|alert|crit|error|warn|notice|info|debug)
    #[arg(long, default_value = "info", value_parser = parse_log_level)]
    pub loglevel: LogLevel,

    /// Path to the rteval configuration file
    #[arg(long, default_value = "/etc/rteval.conf")]
    pub configfile: PathBuf,

    /// Path to the PID file
    #[arg(long, default_value = "/var/run/rteval-parserd.pid")]
    pub pidfile: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use parserd_config::shared::SyslogFacility;

    #[test]
    fn defaults_match_the_daemon_conventions() {
        let cli = Cli::parse_from(["rteval-parserd"]);

        assert_eq!(cli.num_threads, None);
        assert_eq!(cli.log, LogSink::Syslog(SyslogFacility::Daemon));
        assert_eq!(cli.loglevel, LogLevel::Info);
        assert_eq!(cli.configfile, PathBuf::from("/etc/rteval.conf"));
        assert_eq!(cli.pidfile, PathBuf::from("/var/run/rteval-parserd.pid"));
    }

    #[test]
    fn accepts_overrides() {
        let cli = Cli::parse_from([
            "rteval-parserd",
            "--num-threads",
            "8",
            "--log",
            "/var/log/rteval-parserd.log",
            "--loglevel",
            "debug",
            "--configfile",
            "/tmp/rteval.conf",
        ]);

        assert_eq!(cli.num_threads, Some(8));
        assert_eq!(
            cli.log,
            LogSink::File(PathBuf::from("/var/log/rteval-parserd.log"))
        );
        assert_eq!(cli.loglevel, LogLevel::Debug);
    }

    #[test]
    fn rejects_bad_log_options() {
        assert!(Cli::try_parse_from(["rteval-parserd", "--log", "relative/path"]).is_err());
        assert!(Cli::try_parse_from(["rteval-parserd", "--loglevel", "verbose"]).is_err());
    }
}
