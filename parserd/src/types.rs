use std::fmt;
use std::path::PathBuf;

/// Identifier of a submission row in the submission queue table.
///
/// Assigned by the database and monotonically increasing, so ordering by
/// submission id is FIFO ordering of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubmissionId(i32);

impl SubmissionId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn into_inner(self) -> i32 {
        self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identity of the submitting client.
///
/// Used to derive the per-client report subdirectory, so report writes for
/// the same client must be serialized across workers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ClientId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle state of a submission, mirrored in the database row.
///
/// `Rejected` is terminal for structurally invalid submissions that can never
/// succeed on retry; `Failed` records a possibly transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimStatus {
    None,
    Claimed,
    InProgress,
    Succeeded,
    Failed,
    Rejected,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::None => "pending",
            ClaimStatus::Claimed => "claimed",
            ClaimStatus::InProgress => "in_progress",
            ClaimStatus::Succeeded => "succeeded",
            ClaimStatus::Failed => "failed",
            ClaimStatus::Rejected => "rejected",
        }
    }

    /// Returns `true` if no further transition is allowed from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ClaimStatus::Succeeded | ClaimStatus::Failed | ClaimStatus::Rejected
        )
    }
}

impl fmt::Display for ClaimStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One claimed submission, exchanged between the producer and the workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseJob {
    pub submission_id: SubmissionId,
    pub client_id: ClientId,
    pub payload_path: PathBuf,
    pub claim_status: ClaimStatus,
}

impl ParseJob {
    pub fn new(
        submission_id: SubmissionId,
        client_id: ClientId,
        payload_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            submission_id,
            client_id,
            payload_path: payload_path.into(),
            claim_status: ClaimStatus::Claimed,
        }
    }
}

/// One relational row extracted from a transformed report.
///
/// The row schema is owned by the report tables, not by the coordination
/// core; the core only moves rows from the transform seam to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    /// Target table name.
    pub table: String,
    /// Column name/value pairs in insertion order.
    pub values: Vec<(String, String)>,
}

/// Result of transforming a submission payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedReport {
    /// The rendered report document, persisted into the per-client report
    /// directory.
    pub document: String,
    /// Rows to insert into the report tables.
    pub rows: Vec<ReportRow>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_status_round_trips_through_names() {
        assert_eq!(ClaimStatus::None.as_str(), "pending");
        assert_eq!(ClaimStatus::Claimed.as_str(), "claimed");
        assert_eq!(ClaimStatus::Succeeded.as_str(), "succeeded");
    }

    #[test]
    fn terminal_states() {
        assert!(!ClaimStatus::Claimed.is_terminal());
        assert!(!ClaimStatus::InProgress.is_terminal());
        assert!(ClaimStatus::Succeeded.is_terminal());
        assert!(ClaimStatus::Failed.is_terminal());
        assert!(ClaimStatus::Rejected.is_terminal());
    }

    #[test]
    fn new_jobs_are_claimed() {
        let job = ParseJob::new(SubmissionId::new(7), ClientId::from("client-a"), "/tmp/p.xml");
        assert_eq!(job.claim_status, ClaimStatus::Claimed);
    }
}
