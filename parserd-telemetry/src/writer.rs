use std::io;
use std::sync::{Arc, Mutex};

use parserd_config::shared::SyslogFacility;
use syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use tracing_subscriber::fmt::MakeWriter;

fn map_facility(facility: SyslogFacility) -> Facility {
    match facility {
        SyslogFacility::Daemon => Facility::LOG_DAEMON,
        SyslogFacility::User => Facility::LOG_USER,
        SyslogFacility::Local0 => Facility::LOG_LOCAL0,
        SyslogFacility::Local1 => Facility::LOG_LOCAL1,
        SyslogFacility::Local2 => Facility::LOG_LOCAL2,
        SyslogFacility::Local3 => Facility::LOG_LOCAL3,
        SyslogFacility::Local4 => Facility::LOG_LOCAL4,
        SyslogFacility::Local5 => Facility::LOG_LOCAL5,
        SyslogFacility::Local6 => Facility::LOG_LOCAL6,
        SyslogFacility::Local7 => Facility::LOG_LOCAL7,
    }
}

/// `MakeWriter` bridging the fmt layer to a shared syslog connection.
///
/// Every formatted event is forwarded as one informational syslog message;
/// severity filtering has already happened in the subscriber.
pub(crate) struct SyslogMakeWriter {
    logger: Arc<Mutex<Logger<LoggerBackend, Formatter3164>>>,
}

impl SyslogMakeWriter {
    pub(crate) fn connect(facility: SyslogFacility) -> Result<Self, syslog::Error> {
        let formatter = Formatter3164 {
            facility: map_facility(facility),
            hostname: None,
            process: "rteval-parserd".to_string(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter)?;
        Ok(Self {
            logger: Arc::new(Mutex::new(logger)),
        })
    }
}

impl<'a> MakeWriter<'a> for SyslogMakeWriter {
    type Writer = SyslogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SyslogWriter {
            logger: self.logger.clone(),
            buffer: Vec::new(),
        }
    }
}

/// Per-event writer; the fmt layer writes one event then drops the writer,
/// at which point the buffered line is flushed to syslog.
pub(crate) struct SyslogWriter {
    logger: Arc<Mutex<Logger<LoggerBackend, Formatter3164>>>,
    buffer: Vec<u8>,
}

impl SyslogWriter {
    fn send(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let message = String::from_utf8_lossy(&self.buffer);
        let message = message.trim_end();
        if !message.is_empty() {
            let mut logger = self.logger.lock().unwrap();
            let _ = logger.info(message);
        }
        self.buffer.clear();
    }
}

impl io::Write for SyslogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send();
        Ok(())
    }
}

impl Drop for SyslogWriter {
    fn drop(&mut self) {
        self.send();
    }
}
