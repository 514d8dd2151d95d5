//! Orchestrates the daemon lifecycle: session setup, worker pool startup,
//! the producer loop, and the teardown discipline.
//!
//! Teardown order: the producer exits first (no further claims are issued),
//! the queue is closed so blocked workers wake and drain the backlog, the
//! workers are joined, and only then are the producer session and the
//! transform handle dropped.

use std::sync::Arc;
use std::thread;

use parserd_config::shared::PipelineConfig;
use tracing::{error, info, warn};

use crate::error::{ParserdError, ParserdResult};
use crate::arbiter::ReportDirArbiter;
use crate::gateway::SessionFactory;
use crate::producer::Producer;
use crate::queue::JobQueue;
use crate::shutdown::{ShutdownTx, ShutdownView, shutdown_pair};
use crate::transform::ReportTransform;
use crate::workers::{WorkerContext, WorkerPool, WorkerSummary};

enum PipelineState {
    Created,
    Started {
        workers: WorkerPool,
        producer: Option<Producer>,
    },
}

/// Handle for triggering a pipeline shutdown from another thread.
///
/// Held by the signal handler thread and by anything else that needs to stop
/// the daemon. Triggering any number of times is equivalent to triggering
/// once.
#[derive(Clone)]
pub struct PipelineShutdown {
    shutdown_tx: ShutdownTx,
    queue: Arc<JobQueue>,
}

impl PipelineShutdown {
    /// Raises the shutdown flag and wakes every blocked component.
    ///
    /// Returns `true` if this call initiated the shutdown, `false` when one
    /// was already in progress.
    pub fn shutdown(&self) -> bool {
        let initiated = self.shutdown_tx.trigger();
        self.queue.close();
        initiated
    }

    /// Returns `true` once shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_tx.view().is_shutdown()
    }
}

/// The assembled coordination core.
///
/// Created with the injected capabilities, started once, then driven by
/// [`Pipeline::run`] on the calling thread (the producer is the main thread
/// of control). [`Pipeline::wait`] joins the workers after the producer has
/// returned.
pub struct Pipeline {
    config: PipelineConfig,
    session_factory: Arc<dyn SessionFactory>,
    transform: Arc<dyn ReportTransform>,
    queue: Arc<JobQueue>,
    shutdown_tx: ShutdownTx,
    shutdown: ShutdownView,
    state: PipelineState,
}

impl Pipeline {
    /// Creates a pipeline in the `Created` state.
    ///
    /// The queue capacity comes from the configuration when set, otherwise
    /// from the system message-queue hint.
    pub fn new(
        config: PipelineConfig,
        session_factory: Arc<dyn SessionFactory>,
        transform: Arc<dyn ReportTransform>,
    ) -> Self {
        let queue = match config.queue_capacity {
            Some(capacity) => Arc::new(JobQueue::with_capacity(capacity)),
            None => Arc::new(JobQueue::from_system_hint()),
        };
        let (shutdown_tx, shutdown) = shutdown_pair();

        Self {
            config,
            session_factory,
            transform,
            queue,
            shutdown_tx,
            shutdown,
            state: PipelineState::Created,
        }
    }

    /// Returns a cloneable shutdown handle for this pipeline.
    pub fn shutdown_handle(&self) -> PipelineShutdown {
        PipelineShutdown {
            shutdown_tx: self.shutdown_tx.clone(),
            queue: self.queue.clone(),
        }
    }

    /// Number of workers the pipeline will start.
    pub fn worker_count(&self) -> usize {
        self.config
            .threads
            .unwrap_or_else(|| thread::available_parallelism().map_or(1, |n| n.get()))
    }

    /// Connects all database sessions and starts the worker pool.
    ///
    /// Session connection failures are initialisation errors; a thread-spawn
    /// failure is a worker-start error. In both cases the pipeline is shut
    /// down so already-started workers exit.
    pub fn start(&mut self) -> ParserdResult<()> {
        let worker_count = self.worker_count();
        info!(
            workers = worker_count,
            queue_capacity = self.queue.capacity(),
            reportdir = %self.config.reportdir.display(),
            "starting pipeline"
        );

        if let Err(err) = crate::workers::check_report_root(&self.config.reportdir) {
            return Err(ParserdError::configuration(
                "reportdir",
                format!(
                    "report directory {} is unusable: {err}",
                    self.config.reportdir.display()
                ),
            ));
        }

        let producer_session = self.session_factory.connect()?;
        let arbiter = Arc::new(ReportDirArbiter::new());

        let mut contexts = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let session = match self.session_factory.connect() {
                Ok(session) => session,
                Err(err) => {
                    error!(worker_id, error = %err, "could not open worker database session");
                    self.shutdown_handle().shutdown();
                    return Err(err);
                }
            };
            contexts.push(WorkerContext {
                worker_id,
                session,
                queue: self.queue.clone(),
                transform: self.transform.clone(),
                report_root: self.config.reportdir.clone(),
                arbiter: arbiter.clone(),
                shutdown: self.shutdown.clone(),
                retry: self.config.retry.clone(),
            });
        }

        let workers = match WorkerPool::spawn(contexts) {
            Ok(pool) => pool,
            Err(err) => {
                error!(error = %err, "worker pool startup failed");
                self.shutdown_handle().shutdown();
                return Err(err);
            }
        };

        let producer = Producer::new(
            producer_session,
            self.queue.clone(),
            self.shutdown_tx.clone(),
            self.config.queue_full_backoff(),
        );

        self.state = PipelineState::Started {
            workers,
            producer: Some(producer),
        };

        Ok(())
    }

    /// Runs the producer loop on the calling thread until shutdown or a
    /// fatal gateway error.
    pub fn run(&mut self) -> ParserdResult<()> {
        let PipelineState::Started { producer, .. } = &mut self.state else {
            return Err(ParserdError::other("pipeline was not started"));
        };
        let Some(producer) = producer.take() else {
            return Err(ParserdError::other("pipeline producer already ran"));
        };

        producer.run()
    }

    /// Joins all workers and returns the aggregated processing counters.
    ///
    /// Worker panics are logged; they do not mask the counters of the
    /// remaining workers.
    pub fn wait(self) -> WorkerSummary {
        let PipelineState::Started { workers, .. } = self.state else {
            info!("pipeline was not started, skipping wait");
            return WorkerSummary::default();
        };

        // Normally closed by the producer on exit; harmless when repeated.
        self.queue.close();

        info!("waiting for workers to drain the queue and exit");
        let (summary, errors) = workers.join();
        for err in &errors {
            warn!(error = %err, "worker terminated abnormally");
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            rejected = summary.rejected,
            "pipeline stopped"
        );
        summary
    }
}
