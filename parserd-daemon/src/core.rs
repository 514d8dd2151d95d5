use std::sync::Arc;

use parserd::error::{ErrorKind, ParserdError};
use parserd::pipeline::Pipeline;
use parserd_config::load_file_config;
use parserd_postgres::PgSessionFactory;
use tracing::{error, info, warn};

use crate::cli::Cli;
use crate::pidfile::PidFile;
use crate::signals::SignalListener;
use crate::xslt::XsltTransformer;

/// Exit code for a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Exit code when the producer loop fails (notification wait, job fetch).
pub const EXIT_PRODUCER_FAILED: i32 = 1;
/// Exit code for initialisation failures (config, stylesheet, database).
pub const EXIT_INIT_FAILED: i32 = 2;
/// Exit code when the worker pool could not be started.
pub const EXIT_WORKER_START_FAILED: i32 = 3;

fn start_error_exit_code(err: &ParserdError) -> i32 {
    match err.kind() {
        ErrorKind::WorkerStartupFailed { .. } => EXIT_WORKER_START_FAILED,
        _ => EXIT_INIT_FAILED,
    }
}

/// Runs the daemon to completion and returns the process exit code.
pub fn run(options: Cli) -> i32 {
    if let Err(err) = parserd_telemetry::init_tracing(&options.log, options.loglevel) {
        eprintln!("rteval-parserd: could not initialize logging: {err}");
        return EXIT_INIT_FAILED;
    }

    let file_config = match load_file_config(&options.configfile) {
        Ok(config) => config,
        Err(err) => {
            error!(
                configfile = %options.configfile.display(),
                error = %err,
                "could not load configuration"
            );
            return EXIT_INIT_FAILED;
        }
    };

    let mut pipeline_config = file_config.xmlrpc_parser;
    if options.num_threads.is_some() {
        pipeline_config.threads = options.num_threads;
    }

    let transformer = match XsltTransformer::new(&pipeline_config.xsltpath) {
        Ok(transformer) => transformer,
        Err(err) => {
            error!(
                xsltpath = %pipeline_config.xsltpath.display(),
                error = %err,
                "could not set up the XSLT transformer"
            );
            return EXIT_INIT_FAILED;
        }
    };
    info!(
        stylesheet = %transformer.stylesheet().display(),
        "stylesheet resolved"
    );

    let session_factory = Arc::new(PgSessionFactory::new(file_config.database));
    let mut pipeline = Pipeline::new(pipeline_config, session_factory, Arc::new(transformer));

    if let Err(err) = pipeline.start() {
        error!(error = %err, "pipeline startup failed");
        pipeline.wait();
        return start_error_exit_code(&err);
    }

    // Owned by the daemonisation layer, not the coordination core; losing it
    // is worth a warning but not an abort.
    let _pidfile = match PidFile::create(&options.pidfile) {
        Ok(pidfile) => Some(pidfile),
        Err(err) => {
            warn!(
                pidfile = %options.pidfile.display(),
                error = %err,
                "could not write PID file"
            );
            None
        }
    };

    let listener = match SignalListener::spawn(pipeline.shutdown_handle()) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "could not install signal handlers");
            pipeline.shutdown_handle().shutdown();
            pipeline.wait();
            return EXIT_INIT_FAILED;
        }
    };

    let result = pipeline.run();
    pipeline.wait();
    listener.close();

    match result {
        Ok(()) => EXIT_OK,
        Err(err) => {
            error!(error = %err, "daemon exited after producer failure");
            EXIT_PRODUCER_FAILED
        }
    }
}
