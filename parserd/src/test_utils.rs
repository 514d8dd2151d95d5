//! In-memory fakes for exercising the coordination core without a database
//! or a stylesheet engine.
//!
//! [`InMemoryBackend`] emulates the submission queue table, the notification
//! channel and the report tables behind the [`DbGateway`] contract, with
//! scripted failures for claim and persist operations. [`StubTransform`]
//! emulates the transform seam with configurable latency and per-submission
//! failure modes, and records per-client overlap so tests can assert the
//! arbiter's serialisation guarantee.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{ErrorKind, ParserdError, ParserdResult};
use crate::gateway::{DbGateway, NotifyWait, SessionFactory};
use crate::shutdown::ShutdownView;
use crate::transform::{ReportTransform, TransformError};
use crate::types::{
    ClaimStatus, ClientId, ParseJob, ReportRow, SubmissionId, TransformedReport,
};

// Sleeping notification waiters re-check the shutdown flag at this interval.
const NOTIFY_WAIT_QUANTUM: Duration = Duration::from_millis(50);

/// Seed row for the in-memory submission queue.
#[derive(Debug, Clone)]
pub struct SubmissionSeed {
    pub submission_id: i32,
    pub client_id: String,
    pub payload_path: PathBuf,
}

impl SubmissionSeed {
    pub fn new(
        submission_id: i32,
        client_id: impl Into<String>,
        payload_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            submission_id,
            client_id: client_id.into(),
            payload_path: payload_path.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct SubmissionRecord {
    client_id: String,
    payload_path: PathBuf,
    status: ClaimStatus,
    reason: Option<String>,
}

#[derive(Debug, Default)]
struct BackendState {
    submissions: BTreeMap<i32, SubmissionRecord>,
    claim_order: Vec<i32>,
    persisted: HashMap<i32, Vec<ReportRow>>,
    persist_attempts: HashMap<i32, u32>,
    persist_transient_failures: HashMap<i32, u32>,
    fail_next_claim: bool,
    fail_connections: bool,
    notified: bool,
}

/// Shared in-memory stand-in for the external database.
///
/// Cloning shares the same state; every session handed out by
/// [`InMemoryBackend::connect_session`] operates on it, mirroring how real
/// sessions share one database.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<(Mutex<BackendState>, Condvar)>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts pending submissions, preserving FIFO order by submission id.
    pub fn seed_submissions(&self, seeds: impl IntoIterator<Item = SubmissionSeed>) {
        let (lock, notify) = &*self.state;
        let mut state = lock.lock().unwrap();
        for seed in seeds {
            state.submissions.insert(
                seed.submission_id,
                SubmissionRecord {
                    client_id: seed.client_id,
                    payload_path: seed.payload_path,
                    status: ClaimStatus::None,
                    reason: None,
                },
            );
        }
        state.notified = true;
        drop(state);
        notify.notify_all();
    }

    /// Emits a notification on the submission channel.
    pub fn notify(&self) {
        let (lock, notify) = &*self.state;
        lock.lock().unwrap().notified = true;
        notify.notify_all();
    }

    /// Makes the next `claim_next_submission` call fail.
    pub fn fail_next_claim(&self) {
        self.state.0.lock().unwrap().fail_next_claim = true;
    }

    /// Makes all subsequent `connect` calls fail.
    pub fn fail_connections(&self) {
        self.state.0.lock().unwrap().fail_connections = true;
    }

    /// Scripts `count` transient persist failures for a submission before it
    /// is allowed to succeed.
    pub fn script_persist_failures(&self, submission_id: i32, count: u32) {
        self.state
            .0
            .lock()
            .unwrap()
            .persist_transient_failures
            .insert(submission_id, count);
    }

    /// Submission ids in the order they were claimed.
    pub fn claimed_order(&self) -> Vec<i32> {
        self.state.0.lock().unwrap().claim_order.clone()
    }

    /// Current status of a submission.
    pub fn status_of(&self, submission_id: i32) -> Option<ClaimStatus> {
        self.state
            .0
            .lock()
            .unwrap()
            .submissions
            .get(&submission_id)
            .map(|record| record.status)
    }

    /// Recorded failure/rejection reason of a submission.
    pub fn reason_of(&self, submission_id: i32) -> Option<String> {
        self.state
            .0
            .lock()
            .unwrap()
            .submissions
            .get(&submission_id)
            .and_then(|record| record.reason.clone())
    }

    /// Rows persisted for a submission.
    pub fn persisted_rows(&self, submission_id: i32) -> Option<Vec<ReportRow>> {
        self.state
            .0
            .lock()
            .unwrap()
            .persisted
            .get(&submission_id)
            .cloned()
    }

    /// Number of persist attempts made for a submission.
    pub fn persist_attempts(&self, submission_id: i32) -> u32 {
        self.state
            .0
            .lock()
            .unwrap()
            .persist_attempts
            .get(&submission_id)
            .copied()
            .unwrap_or(0)
    }

    /// Returns `true` when every seeded submission is in a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.state
            .0
            .lock()
            .unwrap()
            .submissions
            .values()
            .all(|record| record.status.is_terminal())
    }

    /// Opens a session sharing this backend's state.
    pub fn connect_session(&self) -> Box<dyn DbGateway> {
        Box::new(InMemoryGateway {
            backend: self.clone(),
        })
    }

    /// Wraps this backend in a [`SessionFactory`].
    pub fn session_factory(&self) -> Arc<dyn SessionFactory> {
        Arc::new(InMemorySessionFactory {
            backend: self.clone(),
        })
    }
}

struct InMemorySessionFactory {
    backend: InMemoryBackend,
}

impl SessionFactory for InMemorySessionFactory {
    fn connect(&self) -> ParserdResult<Box<dyn DbGateway>> {
        if self.backend.state.0.lock().unwrap().fail_connections {
            return Err(ParserdError::new(ErrorKind::ConnectionFailed {
                host: "in-memory".to_string(),
                port: 0,
                database: "rteval".to_string(),
            }));
        }
        Ok(self.backend.connect_session())
    }
}

struct InMemoryGateway {
    backend: InMemoryBackend,
}

impl DbGateway for InMemoryGateway {
    fn claim_next_submission(&mut self) -> ParserdResult<Option<ParseJob>> {
        let (lock, _) = &*self.backend.state;
        let mut state = lock.lock().unwrap();

        if state.fail_next_claim {
            state.fail_next_claim = false;
            return Err(ParserdError::new(ErrorKind::ClaimFailed));
        }

        let next = state
            .submissions
            .iter()
            .find(|(_, record)| record.status == ClaimStatus::None)
            .map(|(id, _)| *id);

        let Some(id) = next else {
            return Ok(None);
        };

        let record = state.submissions.get_mut(&id).unwrap();
        record.status = ClaimStatus::Claimed;
        let job = ParseJob::new(
            SubmissionId::new(id),
            ClientId::from(record.client_id.clone()),
            record.payload_path.clone(),
        );
        state.claim_order.push(id);
        Ok(Some(job))
    }

    fn wait_for_notification(
        &mut self,
        _channel: &str,
        shutdown: &ShutdownView,
        timeout: Option<Duration>,
    ) -> ParserdResult<NotifyWait> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let (lock, notify) = &*self.backend.state;
        let mut state = lock.lock().unwrap();

        loop {
            if shutdown.is_shutdown() {
                return Ok(NotifyWait::Shutdown);
            }
            if state.notified {
                state.notified = false;
                return Ok(NotifyWait::Notified);
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Ok(NotifyWait::TimedOut);
            }

            let (next, _timeout) = notify.wait_timeout(state, NOTIFY_WAIT_QUANTUM).unwrap();
            state = next;
        }
    }

    fn mark_in_progress(&mut self, submission_id: SubmissionId) -> ParserdResult<()> {
        let mut state = self.backend.state.0.lock().unwrap();
        if let Some(record) = state.submissions.get_mut(&submission_id.into_inner()) {
            record.status = ClaimStatus::InProgress;
        }
        Ok(())
    }

    fn persist_report(
        &mut self,
        submission_id: SubmissionId,
        rows: &[ReportRow],
    ) -> ParserdResult<()> {
        let id = submission_id.into_inner();
        let mut state = self.backend.state.0.lock().unwrap();

        *state.persist_attempts.entry(id).or_insert(0) += 1;

        if let Some(remaining) = state.persist_transient_failures.get_mut(&id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ParserdError::report_persist_failed(submission_id));
        }

        state.persisted.insert(id, rows.to_vec());
        if let Some(record) = state.submissions.get_mut(&id) {
            record.status = ClaimStatus::Succeeded;
            record.reason = None;
        }
        Ok(())
    }

    fn mark_failed(&mut self, submission_id: SubmissionId, reason: &str) -> ParserdResult<()> {
        let mut state = self.backend.state.0.lock().unwrap();
        if let Some(record) = state.submissions.get_mut(&submission_id.into_inner()) {
            record.status = ClaimStatus::Failed;
            record.reason = Some(reason.to_string());
        }
        Ok(())
    }

    fn mark_rejected(&mut self, submission_id: SubmissionId, reason: &str) -> ParserdResult<()> {
        let mut state = self.backend.state.0.lock().unwrap();
        if let Some(record) = state.submissions.get_mut(&submission_id.into_inner()) {
            record.status = ClaimStatus::Rejected;
            record.reason = Some(reason.to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct OverlapState {
    active: HashMap<String, usize>,
    max: HashMap<String, usize>,
}

/// Transform fake with configurable latency and scripted failures.
///
/// Tracks how many transforms run concurrently for each client; with the
/// arbiter in place the maximum must stay at 1.
#[derive(Debug, Default)]
pub struct StubTransform {
    latency: Duration,
    structural_failures: Mutex<HashSet<i32>>,
    transient_failures: Mutex<HashSet<i32>>,
    overlap: Mutex<OverlapState>,
    started: Mutex<Vec<i32>>,
}

impl StubTransform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how long each transform takes.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Scripts a structural failure for a submission.
    pub fn reject_submission(&self, submission_id: i32) {
        self.structural_failures
            .lock()
            .unwrap()
            .insert(submission_id);
    }

    /// Scripts a transient failure for a submission.
    pub fn fail_submission(&self, submission_id: i32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(submission_id);
    }

    /// Maximum number of concurrent transforms observed for a client.
    pub fn max_overlap(&self, client_id: &str) -> usize {
        self.overlap
            .lock()
            .unwrap()
            .max
            .get(client_id)
            .copied()
            .unwrap_or(0)
    }

    /// Submission ids in the order their transform started.
    pub fn started_order(&self) -> Vec<i32> {
        self.started.lock().unwrap().clone()
    }
}

impl ReportTransform for StubTransform {
    fn transform(&self, job: &ParseJob) -> Result<TransformedReport, TransformError> {
        let id = job.submission_id.into_inner();
        let client = job.client_id.as_str().to_string();

        self.started.lock().unwrap().push(id);
        {
            let mut overlap = self.overlap.lock().unwrap();
            let active = overlap.active.entry(client.clone()).or_insert(0);
            *active += 1;
            let active = *active;
            let max = overlap.max.entry(client.clone()).or_insert(0);
            *max = (*max).max(active);
        }

        let result = if self.structural_failures.lock().unwrap().contains(&id) {
            Err(TransformError::structural("payload failed to parse"))
        } else if self.transient_failures.lock().unwrap().contains(&id) {
            Err(TransformError::transient("transform resource unavailable"))
        } else {
            if !self.latency.is_zero() {
                thread::sleep(self.latency);
            }
            Ok(TransformedReport {
                document: format!("<report submid=\"{id}\" client=\"{client}\"/>"),
                rows: vec![ReportRow {
                    table: "report_summary".to_string(),
                    values: vec![
                        ("submid".to_string(), id.to_string()),
                        ("clientid".to_string(), client.clone()),
                    ],
                }],
            })
        };

        {
            let mut overlap = self.overlap.lock().unwrap();
            if let Some(active) = overlap.active.get_mut(&client) {
                *active -= 1;
            }
        }

        result
    }
}
