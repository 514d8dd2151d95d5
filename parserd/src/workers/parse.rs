use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use parserd_config::shared::RetryConfig;
use tracing::{debug, error, info, warn};

use crate::arbiter::ReportDirArbiter;
use crate::gateway::DbGateway;
use crate::queue::JobQueue;
use crate::shutdown::ShutdownView;
use crate::transform::ReportTransform;
use crate::types::{ParseJob, ReportRow, SubmissionId};

/// Everything one worker needs, created once and owned for the daemon's
/// lifetime.
///
/// The database session is exclusively owned; the transform handle, report
/// root and arbiter are shared read-only across the pool.
pub struct WorkerContext {
    /// Worker index, `0..N-1`.
    pub worker_id: usize,
    /// This worker's database session. Never shared.
    pub session: Box<dyn DbGateway>,
    /// Handoff queue the producer feeds.
    pub queue: Arc<JobQueue>,
    /// Shared compiled-stylesheet handle.
    pub transform: Arc<dyn ReportTransform>,
    /// Root directory of the per-client report subtrees.
    pub report_root: PathBuf,
    /// Serialises per-client report directory access.
    pub arbiter: Arc<ReportDirArbiter>,
    /// Read-only view of the shutdown flag.
    pub shutdown: ShutdownView,
    /// Retry schedule for transient database failures.
    pub retry: RetryConfig,
}

/// Counters a worker reports when it exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSummary {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub rejected: u64,
}

enum JobOutcome {
    Succeeded,
    Failed,
    Rejected,
}

/// One worker: loops dequeuing jobs until shutdown is observed and the queue
/// has drained.
///
/// Per-job errors are absorbed and recorded against the submission; only the
/// dequeue loop itself ends the worker.
pub struct ParseWorker {
    ctx: WorkerContext,
}

impl ParseWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    /// Runs the worker loop to completion and returns the final counters.
    pub fn run(mut self) -> WorkerSummary {
        let worker_id = self.ctx.worker_id;
        info!(worker_id, "worker started");

        let mut summary = WorkerSummary::default();
        while let Some(job) = self.ctx.queue.dequeue_blocking(&self.ctx.shutdown) {
            summary.processed += 1;
            match self.process_job(job) {
                JobOutcome::Succeeded => summary.succeeded += 1,
                JobOutcome::Failed => summary.failed += 1,
                JobOutcome::Rejected => summary.rejected += 1,
            }
        }

        info!(
            worker_id,
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            rejected = summary.rejected,
            "worker exiting"
        );
        summary
    }

    fn process_job(&mut self, job: ParseJob) -> JobOutcome {
        let submission_id = job.submission_id;
        debug!(
            worker_id = self.ctx.worker_id,
            submission_id = %submission_id,
            client_id = %job.client_id,
            payload = %job.payload_path.display(),
            "processing submission"
        );

        if let Err(error) = self.ctx.session.mark_in_progress(submission_id) {
            // Status bookkeeping only; the claim already isolates the row.
            warn!(
                submission_id = %submission_id,
                %error,
                "could not mark submission in progress"
            );
        }

        // Held for the whole transform-and-write span; released on every
        // return path below when the slot drops.
        let _slot = self.ctx.arbiter.acquire(job.client_id.clone());

        let report = match self.ctx.transform.transform(&job) {
            Ok(report) => report,
            Err(error) if error.is_structural() => {
                warn!(
                    submission_id = %submission_id,
                    reason = error.reason(),
                    "submission rejected: payload cannot be transformed"
                );
                self.record_rejected(submission_id, error.reason());
                return JobOutcome::Rejected;
            }
            Err(error) => {
                warn!(
                    submission_id = %submission_id,
                    reason = error.reason(),
                    "transform failed transiently"
                );
                self.record_failed(submission_id, error.reason());
                return JobOutcome::Failed;
            }
        };

        if let Err(error) = self.write_report_document(&job, &report.document) {
            warn!(
                submission_id = %submission_id,
                %error,
                "could not write report document"
            );
            self.record_failed(
                submission_id,
                &format!("failed to write report document: {error}"),
            );
            return JobOutcome::Failed;
        }

        self.persist_with_retry(submission_id, &report.rows)
    }

    /// Writes the transformed document under the client's report
    /// subdirectory. The caller holds the arbiter slot for this client.
    fn write_report_document(&self, job: &ParseJob, document: &str) -> io::Result<PathBuf> {
        let client_dir = self.ctx.report_root.join(job.client_id.as_str());
        fs::create_dir_all(&client_dir)?;

        let path = client_dir.join(format!("report-{}.xml", job.submission_id));
        fs::write(&path, document)?;
        Ok(path)
    }

    /// Persists report rows, retrying transient database failures with
    /// exponential backoff. On exhaustion the submission is marked failed.
    ///
    /// The sleeps are short and bounded, so the retries run to completion
    /// even during shutdown rather than abandoning a nearly-finished report.
    fn persist_with_retry(&mut self, submission_id: SubmissionId, rows: &[ReportRow]) -> JobOutcome {
        let mut attempt = 1u32;
        loop {
            match self.ctx.session.persist_report(submission_id, rows) {
                Ok(()) => {
                    info!(
                        submission_id = %submission_id,
                        rows = rows.len(),
                        "report persisted"
                    );
                    return JobOutcome::Succeeded;
                }
                Err(error) if error.is_retryable() && attempt < self.ctx.retry.max_attempts => {
                    let delay = self.ctx.retry.delay_after(attempt);
                    warn!(
                        submission_id = %submission_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "report persist failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(error) => {
                    error!(
                        submission_id = %submission_id,
                        attempts = attempt,
                        %error,
                        "report persist failed permanently"
                    );
                    self.record_failed(submission_id, &format!("report persist failed: {error}"));
                    return JobOutcome::Failed;
                }
            }
        }
    }

    fn record_failed(&mut self, submission_id: SubmissionId, reason: &str) {
        if let Err(error) = self.ctx.session.mark_failed(submission_id, reason) {
            error!(
                submission_id = %submission_id,
                %error,
                "could not record submission failure"
            );
        }
    }

    fn record_rejected(&mut self, submission_id: SubmissionId, reason: &str) {
        if let Err(error) = self.ctx.session.mark_rejected(submission_id, reason) {
            error!(
                submission_id = %submission_id,
                %error,
                "could not record submission rejection"
            );
        }
    }
}

/// Validates that the report root exists and is a directory.
pub(crate) fn check_report_root(report_root: &Path) -> io::Result<()> {
    let metadata = fs::metadata(report_root)?;
    if !metadata.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", report_root.display()),
        ));
    }
    Ok(())
}
