//! Contract between the coordination core and the external database.
//!
//! The core never talks SQL. It claims submissions, waits on the notification
//! channel, persists report rows and records status transitions through
//! [`DbGateway`]; the concrete implementation lives outside the core and is
//! injected at construction via a [`SessionFactory`]. One session per caller,
//! never shared: the producer owns one session, each worker owns its own.

use std::time::Duration;

use crate::error::ParserdResult;
use crate::shutdown::ShutdownView;
use crate::types::{ParseJob, ReportRow, SubmissionId};

/// Outcome of a bounded wait on the database notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyWait {
    /// A notification arrived on the channel.
    Notified,
    /// The timeout elapsed without a notification.
    TimedOut,
    /// Shutdown was observed while waiting.
    Shutdown,
}

/// One database session.
///
/// Implementations own a single connection. Worker-facing operations
/// (`persist_report`, the status transitions) are expected to reconnect on a
/// dropped connection; the producer-facing operations propagate errors, which
/// the producer treats as fatal.
pub trait DbGateway: Send {
    /// Claims the oldest pending submission, transitioning its row to
    /// `claimed` in the same transaction.
    ///
    /// Returns `None` when no submission is pending. Must be race-safe
    /// against concurrent claimers, although the core only ever claims from
    /// the single producer session.
    fn claim_next_submission(&mut self) -> ParserdResult<Option<ParseJob>>;

    /// Blocks until a notification arrives on `channel`, the timeout elapses,
    /// or shutdown is observed.
    ///
    /// Implementations must wake within a bounded interval (a few seconds at
    /// most) after shutdown triggers, even while blocked on the notification
    /// socket. `None` means no timeout: wait until notified or shut down.
    fn wait_for_notification(
        &mut self,
        channel: &str,
        shutdown: &ShutdownView,
        timeout: Option<Duration>,
    ) -> ParserdResult<NotifyWait>;

    /// Marks a claimed submission as being worked on.
    fn mark_in_progress(&mut self, submission_id: SubmissionId) -> ParserdResult<()>;

    /// Persists the report rows for a submission in one transaction and
    /// transitions the submission row to `succeeded`.
    fn persist_report(
        &mut self,
        submission_id: SubmissionId,
        rows: &[ReportRow],
    ) -> ParserdResult<()>;

    /// Transitions a submission to `failed`, recording the reason.
    fn mark_failed(&mut self, submission_id: SubmissionId, reason: &str) -> ParserdResult<()>;

    /// Transitions a submission to `rejected`, the terminal state for
    /// structurally invalid submissions.
    fn mark_rejected(&mut self, submission_id: SubmissionId, reason: &str) -> ParserdResult<()>;
}

/// Opens database sessions for the producer and the workers.
pub trait SessionFactory: Send + Sync {
    /// Opens a fresh session. Fails when the database is unavailable.
    fn connect(&self) -> ParserdResult<Box<dyn DbGateway>>;
}
