use std::io;
use std::thread;

use parserd::pipeline::PipelineShutdown;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use tracing::info;

/// Background thread turning termination signals into pipeline shutdowns.
///
/// The handler stays armed for the daemon's lifetime: the first delivery
/// starts the shutdown, repeated deliveries are acknowledged with a distinct
/// message while the drain continues. A forced stop remains available
/// through SIGKILL.
pub struct SignalListener {
    handle: Handle,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalListener {
    /// Installs handlers for SIGINT and SIGTERM.
    pub fn spawn(shutdown: PipelineShutdown) -> io::Result<Self> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let handle = signals.handle();

        let thread = thread::Builder::new()
            .name("signal-listener".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    if shutdown.shutdown() {
                        info!(signal, "termination signal received, starting shutdown");
                    } else {
                        info!(signal, "shutdown already in progress, please be patient");
                    }
                }
            })?;

        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }

    /// Stops listening and joins the handler thread.
    pub fn close(mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SignalListener {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
