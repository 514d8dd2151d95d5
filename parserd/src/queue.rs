//! Bounded in-memory handoff between the producer and the workers.
//!
//! Single producer, many consumers. Enqueueing never blocks: on a full queue
//! the job is handed back so the producer can apply backpressure without
//! losing it. Dequeueing blocks until a job arrives, and drains the remaining
//! backlog after shutdown before reporting exhaustion.
//!
//! The capacity is chosen at startup from the system message-queue hint
//! ([`capacity_hint`]), which is where the handoff queue historically lived.

use std::collections::VecDeque;
use std::fs;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::warn;

use crate::shutdown::ShutdownView;
use crate::types::ParseJob;

/// Fallback queue capacity when the system hint is unavailable.
pub const DEFAULT_CAPACITY: usize = 5;

const MSG_MAX_PATH: &str = "/proc/sys/fs/mqueue/msg_max";

// Sleeping consumers re-check the shutdown flag at this interval so a bare
// flag trigger (without an explicit close) still terminates them.
const WAIT_QUANTUM: Duration = Duration::from_millis(200);

/// Outcome of a non-blocking enqueue attempt.
///
/// Both rejection variants hand the job back to the caller: a rejected job is
/// never lost, only delayed.
#[derive(Debug)]
pub enum TryEnqueueError {
    /// The queue already holds `capacity` jobs.
    Full(ParseJob),
    /// The queue was closed by the shutdown coordinator.
    Closed(ParseJob),
}

#[derive(Debug)]
struct QueueInner {
    jobs: VecDeque<ParseJob>,
    closed: bool,
}

/// Bounded FIFO job queue with non-blocking enqueue and blocking dequeue.
#[derive(Debug)]
pub struct JobQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
    capacity: usize,
}

impl JobQueue {
    /// Creates a queue bounded at `capacity` jobs.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    /// Creates a queue sized from the system hint.
    pub fn from_system_hint() -> Self {
        Self::with_capacity(capacity_hint())
    }

    /// Attempts to enqueue a job without blocking.
    ///
    /// Fails with [`TryEnqueueError::Full`] when the queue is at capacity and
    /// with [`TryEnqueueError::Closed`] once the queue has been closed; in
    /// both cases the job is returned to the caller.
    pub fn try_enqueue(&self, job: ParseJob) -> Result<(), TryEnqueueError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return Err(TryEnqueueError::Closed(job));
        }
        if inner.jobs.len() >= self.capacity {
            return Err(TryEnqueueError::Full(job));
        }
        inner.jobs.push_back(job);
        drop(inner);
        self.available.notify_one();
        Ok(())
    }

    /// Dequeues the oldest job, blocking until one is available.
    ///
    /// Returns `None` once shutdown has been observed and the queue is empty.
    /// Jobs still queued at shutdown are drained first, so in-flight work is
    /// never dropped.
    pub fn dequeue_blocking(&self, shutdown: &ShutdownView) -> Option<ParseJob> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(job) = inner.jobs.pop_front() {
                return Some(job);
            }
            if inner.closed || shutdown.is_shutdown() {
                return None;
            }
            let (next, _timeout) = self
                .available
                .wait_timeout(inner, WAIT_QUANTUM)
                .unwrap();
            inner = next;
        }
    }

    /// Closes the queue, waking all blocked consumers.
    ///
    /// Called by the shutdown coordinator; idempotent. Already-queued jobs
    /// remain dequeueable.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        drop(inner);
        self.available.notify_all();
    }

    /// Current number of queued jobs.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().jobs.len()
    }

    /// Returns `true` when no jobs are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The fixed capacity chosen at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Reads the system's per-queue message limit to size the job queue.
///
/// Falls back to [`DEFAULT_CAPACITY`] when the limit cannot be read or
/// parsed.
pub fn capacity_hint() -> usize {
    match fs::read_to_string(MSG_MAX_PATH) {
        Ok(contents) => parse_msg_max(&contents).unwrap_or_else(|| {
            warn!(
                path = MSG_MAX_PATH,
                fallback = DEFAULT_CAPACITY,
                "could not parse message queue limit, using fallback capacity"
            );
            DEFAULT_CAPACITY
        }),
        Err(error) => {
            warn!(
                path = MSG_MAX_PATH,
                fallback = DEFAULT_CAPACITY,
                %error,
                "could not read message queue limit, using fallback capacity"
            );
            DEFAULT_CAPACITY
        }
    }
}

fn parse_msg_max(contents: &str) -> Option<usize> {
    let value = contents.trim().parse::<usize>().ok()?;
    if value >= 1 { Some(value) } else { None }
}
