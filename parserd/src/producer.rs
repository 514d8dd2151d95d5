//! The producer loop: claim pending submissions, park on the notification
//! channel when the queue table is empty, and feed the in-memory job queue
//! with backpressure.
//!
//! The producer always claims before waiting, so submissions left pending by
//! a previous daemon lifetime are drained on startup without waiting for a
//! notification. Any gateway error is fatal: the producer raises the
//! shutdown flag and returns the error, which the daemon maps to a nonzero
//! exit.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ParserdResult;
use crate::gateway::{DbGateway, NotifyWait};
use crate::queue::{JobQueue, TryEnqueueError};
use crate::shutdown::{ShutdownTx, ShutdownView};
use crate::types::ParseJob;

/// Database notification channel announcing new submission rows.
pub const SUBMISSION_QUEUE_CHANNEL: &str = "rteval_submq";

/// The single producer. Runs on the main thread of control after the workers
/// have been started.
pub struct Producer {
    session: Box<dyn DbGateway>,
    queue: Arc<JobQueue>,
    shutdown_tx: ShutdownTx,
    shutdown: ShutdownView,
    queue_full_backoff: Duration,
}

impl Producer {
    pub fn new(
        session: Box<dyn DbGateway>,
        queue: Arc<JobQueue>,
        shutdown_tx: ShutdownTx,
        queue_full_backoff: Duration,
    ) -> Self {
        let shutdown = shutdown_tx.view();
        Self {
            session,
            queue,
            shutdown_tx,
            shutdown,
            queue_full_backoff,
        }
    }

    /// Runs the producer loop until shutdown is observed or a gateway error
    /// occurs.
    ///
    /// On error the shutdown flag is raised and the queue closed before
    /// returning, so the workers drain and exit.
    pub fn run(mut self) -> ParserdResult<()> {
        info!(channel = SUBMISSION_QUEUE_CHANNEL, "submission queue checker started");

        let result = self.run_loop();
        if let Err(ref error) = result {
            error!(%error, "producer failed, shutting down");
            self.shutdown_tx.trigger();
        }
        // No new jobs will arrive; let blocked workers drain and exit.
        self.queue.close();

        info!("submission queue checker stopped");
        result
    }

    fn run_loop(&mut self) -> ParserdResult<()> {
        while !self.shutdown.is_shutdown() {
            let Some(job) = self.session.claim_next_submission()? else {
                match self.session.wait_for_notification(
                    SUBMISSION_QUEUE_CHANNEL,
                    &self.shutdown,
                    None,
                )? {
                    NotifyWait::Notified => debug!("submission notification received"),
                    NotifyWait::TimedOut => debug!("notification wait timed out"),
                    NotifyWait::Shutdown => break,
                }
                continue;
            };

            info!(
                submission_id = %job.submission_id,
                client_id = %job.client_id,
                payload = %job.payload_path.display(),
                "new submission claimed"
            );
            self.enqueue_with_backpressure(job)?;
        }

        Ok(())
    }

    /// Enqueues one claimed job, backing off while the queue is full.
    ///
    /// The same job is retried until it fits; a claimed job must not be
    /// lost. If shutdown arrives before the job could be handed over, the
    /// submission is marked failed so no row is left dangling in `claimed`.
    fn enqueue_with_backpressure(&mut self, job: ParseJob) -> ParserdResult<()> {
        let mut pending = job;
        let mut warned = false;

        loop {
            match self.queue.try_enqueue(pending) {
                Ok(()) => return Ok(()),
                Err(TryEnqueueError::Full(returned)) => {
                    pending = returned;
                    if !warned {
                        warn!(
                            submission_id = %pending.submission_id,
                            backoff_secs = self.queue_full_backoff.as_secs(),
                            "job queue full, backing off before re-enqueueing"
                        );
                        warned = true;
                    } else {
                        debug!(
                            submission_id = %pending.submission_id,
                            "job queue still full, backing off again"
                        );
                    }

                    if self.shutdown.sleep_interruptible(self.queue_full_backoff) {
                        return self.abandon_undispatched(pending);
                    }
                }
                Err(TryEnqueueError::Closed(returned)) => {
                    return self.abandon_undispatched(returned);
                }
            }
        }
    }

    /// Records a claimed-but-undispatched job as failed during shutdown so
    /// its row does not stay `claimed` forever.
    fn abandon_undispatched(&mut self, job: ParseJob) -> ParserdResult<()> {
        warn!(
            submission_id = %job.submission_id,
            "shutdown before dispatch, marking submission failed"
        );
        self.session
            .mark_failed(job.submission_id, "daemon shut down before dispatch")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::shutdown_pair;
    use crate::test_utils::{InMemoryBackend, SubmissionSeed};
    use std::thread;
    use std::time::Instant;

    fn seed(id: i32, client: &str) -> SubmissionSeed {
        SubmissionSeed::new(id, client, format!("/tmp/submission-{id}.xml"))
    }

    #[test]
    fn drains_preexisting_submissions_before_waiting() {
        let backend = InMemoryBackend::new();
        backend.seed_submissions([seed(1, "a"), seed(2, "a")]);

        let (tx, _shutdown) = shutdown_pair();
        let queue = Arc::new(JobQueue::with_capacity(5));
        let producer = Producer::new(
            backend.connect_session(),
            queue.clone(),
            tx.clone(),
            Duration::from_millis(50),
        );

        let handle = thread::spawn(move || producer.run());

        // Both pending rows should be claimed and enqueued without any
        // notification being sent.
        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(queue.len(), 2);

        tx.trigger();
        backend.notify();
        handle.join().unwrap().unwrap();

        assert_eq!(backend.claimed_order(), vec![1, 2]);
    }

    #[test]
    fn wakes_from_notification_wait_on_shutdown() {
        let backend = InMemoryBackend::new();
        let (tx, _shutdown) = shutdown_pair();
        let queue = Arc::new(JobQueue::with_capacity(5));
        let producer = Producer::new(
            backend.connect_session(),
            queue,
            tx.clone(),
            Duration::from_millis(50),
        );

        let handle = thread::spawn(move || producer.run());
        thread::sleep(Duration::from_millis(100));

        let start = Instant::now();
        tx.trigger();
        handle.join().unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn gateway_error_is_fatal_and_raises_shutdown() {
        let backend = InMemoryBackend::new();
        backend.fail_next_claim();

        let (tx, shutdown) = shutdown_pair();
        let queue = Arc::new(JobQueue::with_capacity(5));
        let producer = Producer::new(
            backend.connect_session(),
            queue,
            tx,
            Duration::from_millis(50),
        );

        assert!(producer.run().is_err());
        assert!(shutdown.is_shutdown());
    }

    #[test]
    fn full_queue_retries_same_job_without_loss() {
        let backend = InMemoryBackend::new();
        backend.seed_submissions([seed(1, "a"), seed(2, "a"), seed(3, "a")]);

        let (tx, shutdown) = shutdown_pair();
        let queue = Arc::new(JobQueue::with_capacity(2));
        let producer = Producer::new(
            backend.connect_session(),
            queue.clone(),
            tx.clone(),
            Duration::from_millis(30),
        );

        let handle = thread::spawn(move || producer.run());

        // The queue holds two jobs; the third keeps being retried.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(queue.len(), 2);

        // Make room; the backed-off producer must enqueue the same job.
        let first = queue.dequeue_blocking(&shutdown).unwrap();
        assert_eq!(first.submission_id.into_inner(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while queue.len() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(queue.len(), 2);

        tx.trigger();
        backend.notify();
        handle.join().unwrap().unwrap();

        let mut remaining: Vec<i32> = Vec::new();
        while let Some(job) = queue.dequeue_blocking(&shutdown) {
            remaining.push(job.submission_id.into_inner());
        }
        assert_eq!(remaining, vec![2, 3]);
    }
}
