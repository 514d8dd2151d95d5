use std::thread;

use tracing::{debug, error};

use crate::error::{ErrorKind, ParserdError, ParserdResult};
use crate::workers::parse::{ParseWorker, WorkerContext, WorkerSummary};

/// Handle to one spawned worker thread.
#[derive(Debug)]
pub struct WorkerHandle {
    worker_id: usize,
    handle: Option<thread::JoinHandle<WorkerSummary>>,
}

impl WorkerHandle {
    /// Waits for the worker thread to exit.
    ///
    /// A worker that panicked is reported as an error; workers otherwise
    /// always return their summary.
    pub fn join(mut self) -> ParserdResult<WorkerSummary> {
        let Some(handle) = self.handle.take() else {
            return Ok(WorkerSummary::default());
        };

        handle.join().map_err(|_| {
            ParserdError::new(ErrorKind::WorkerPanicked {
                worker_id: self.worker_id,
            })
        })
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }
}

/// The fixed pool of worker threads.
///
/// Spawned once at startup; the pool never resizes. Joining consumes the
/// pool and reports per-worker results so the caller can aggregate.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Vec<WorkerHandle>,
}

impl WorkerPool {
    /// Spawns one OS thread per context.
    ///
    /// Fails with a worker-startup error if any thread cannot be created;
    /// threads spawned before the failure keep running and exit once the
    /// caller closes the queue.
    pub fn spawn(contexts: Vec<WorkerContext>) -> ParserdResult<Self> {
        let mut handles = Vec::with_capacity(contexts.len());
        for ctx in contexts {
            let worker_id = ctx.worker_id;
            let handle = thread::Builder::new()
                .name(format!("parse-worker-{worker_id}"))
                .spawn(move || ParseWorker::new(ctx).run())
                .map_err(|err| ParserdError::worker_startup_failed(worker_id, err))?;

            debug!(worker_id, "spawned worker thread");
            handles.push(WorkerHandle {
                worker_id,
                handle: Some(handle),
            });
        }

        Ok(Self { handles })
    }

    /// Number of workers in the pool.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Joins every worker and returns the aggregated summary plus any panic
    /// errors.
    pub fn join(self) -> (WorkerSummary, Vec<ParserdError>) {
        let mut total = WorkerSummary::default();
        let mut errors = Vec::new();

        for handle in self.handles {
            let worker_id = handle.worker_id();
            match handle.join() {
                Ok(summary) => {
                    total.processed += summary.processed;
                    total.succeeded += summary.succeeded;
                    total.failed += summary.failed;
                    total.rejected += summary.rejected;
                }
                Err(err) => {
                    error!(worker_id, error = %err, "worker join failed");
                    errors.push(err);
                }
            }
        }

        (total, errors)
    }
}
