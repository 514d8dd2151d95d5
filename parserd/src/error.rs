use std::{error, fmt, result};

use crate::types::SubmissionId;

/// Type alias for convenience when using the Result type with our Error.
pub type ParserdResult<T> = result::Result<T, ParserdError>;

/// Internal error representation with kind and optional source error.
///
/// Uses boxing to keep the public Error type size consistent and enable
/// rich error context without performance penalties for the success path.
struct ErrorInner {
    kind: ErrorKind,
    source: Option<Box<dyn error::Error + Send + Sync>>,
}

/// Error classification for the parser daemon.
///
/// The kinds cover the failure categories of a queue-draining daemon:
/// database session management, submission claiming, notification waits,
/// report persistence, and worker lifecycle. The classification drives the
/// recovery decision a worker makes for each job.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Database connection failure with connection details
    ConnectionFailed {
        host: String,
        port: u16,
        database: String,
    },
    /// Authentication failure during database connection
    AuthenticationFailed { user: String, database: String },
    /// Connection lost during ongoing operations
    ConnectionLost,
    /// SQL statement execution failure
    QueryExecutionFailed { operation: String },
    /// Database transaction operation failure
    TransactionFailed,
    /// Waiting on the database notification channel failed
    NotificationWaitFailed { channel: String },
    /// Claiming the next pending submission failed
    ClaimFailed,
    /// Persisting report rows for a submission failed
    ReportPersistFailed { submission_id: SubmissionId },
    /// Updating a submission's status failed
    StatusUpdateFailed {
        submission_id: SubmissionId,
        status: String,
    },

    /// Worker thread could not be started
    WorkerStartupFailed { worker_id: usize },
    /// Worker thread panicked during execution
    WorkerPanicked { worker_id: usize },

    /// Resource limit exceeded (memory, disk, connections)
    ResourceLimitExceeded { resource: String },
    /// Configuration parsing or validation failure
    ConfigurationError { parameter: String, reason: String },
    /// I/O operation failure
    IoError,
    /// Timeout during operation
    Timeout { operation: String },

    /// Error that doesn't fit other categories
    Other { description: String },
}

/// Error recovery strategy hint for automated error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// No retry - permanent failure
    NoRetry,
    /// Retry with exponential backoff
    RetryWithBackoff,
}

/// A stable error type for the parser daemon using the ErrorInner pattern.
///
/// Provides a stable public API while allowing internal error details to
/// evolve. Supports error chaining, structured error data, and classification
/// for recovery strategies.
pub struct ParserdError(Box<ErrorInner>);

impl ParserdError {
    /// Creates a new error with the specified kind.
    pub fn new(kind: ErrorKind) -> Self {
        ParserdError(Box::new(ErrorInner { kind, source: None }))
    }

    /// Creates a new error with the specified kind and source error.
    pub fn with_source<E>(kind: ErrorKind, source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        ParserdError(Box::new(ErrorInner {
            kind,
            source: Some(source.into()),
        }))
    }

    /// Creates a report persistence error for a submission.
    pub fn report_persist_failed(submission_id: SubmissionId) -> Self {
        Self::new(ErrorKind::ReportPersistFailed { submission_id })
    }

    /// Creates a worker startup error.
    pub fn worker_startup_failed<E>(worker_id: usize, source: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::with_source(ErrorKind::WorkerStartupFailed { worker_id }, source)
    }

    /// Creates a configuration error.
    pub fn configuration(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationError {
            parameter: parameter.into(),
            reason: reason.into(),
        })
    }

    /// Creates an uncategorized error.
    pub fn other(description: impl Into<String>) -> Self {
        Self::new(ErrorKind::Other {
            description: description.into(),
        })
    }

    /// Returns the error kind.
    pub fn kind(&self) -> &ErrorKind {
        &self.0.kind
    }

    /// Returns the recommended recovery strategy for this error.
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        use ErrorKind::*;
        match &self.0.kind {
            // Permanent failures: retrying cannot help.
            AuthenticationFailed { .. }
            | ConfigurationError { .. }
            | WorkerStartupFailed { .. }
            | WorkerPanicked { .. }
            | Other { .. } => RecoveryStrategy::NoRetry,

            // Transient failures: connection and resource trouble clears up.
            ConnectionFailed { .. }
            | ConnectionLost
            | QueryExecutionFailed { .. }
            | TransactionFailed
            | NotificationWaitFailed { .. }
            | ClaimFailed
            | ReportPersistFailed { .. }
            | StatusUpdateFailed { .. }
            | ResourceLimitExceeded { .. }
            | IoError
            | Timeout { .. } => RecoveryStrategy::RetryWithBackoff,
        }
    }

    /// Returns true if this error is likely transient and retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self.recovery_strategy(), RecoveryStrategy::RetryWithBackoff)
    }
}

impl fmt::Debug for ParserdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParserdError")
            .field("kind", &self.0.kind)
            .field("source", &self.0.source)
            .finish()
    }
}

impl fmt::Display for ParserdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ErrorKind::*;

        match &self.0.kind {
            ConnectionFailed {
                host,
                port,
                database,
            } => {
                write!(
                    f,
                    "failed to connect to database '{database}' at {host}:{port}"
                )
            }
            AuthenticationFailed { user, database } => {
                write!(
                    f,
                    "authentication failed for user '{user}' on database '{database}'"
                )
            }
            ConnectionLost => write!(f, "database connection lost"),
            QueryExecutionFailed { operation } => {
                write!(f, "query execution failed during {operation}")
            }
            TransactionFailed => write!(f, "database transaction failed"),
            NotificationWaitFailed { channel } => {
                write!(f, "waiting for notification on channel '{channel}' failed")
            }
            ClaimFailed => write!(f, "failed to claim next submission"),
            ReportPersistFailed { submission_id } => {
                write!(f, "failed to persist report for submission {submission_id}")
            }
            StatusUpdateFailed {
                submission_id,
                status,
            } => {
                write!(
                    f,
                    "failed to mark submission {submission_id} as {status}"
                )
            }

            WorkerStartupFailed { worker_id } => {
                write!(f, "worker {worker_id} failed to start")
            }
            WorkerPanicked { worker_id } => {
                write!(f, "worker {worker_id} panicked")
            }

            ResourceLimitExceeded { resource } => {
                write!(f, "resource limit exceeded for '{resource}'")
            }
            ConfigurationError { parameter, reason } => {
                write!(
                    f,
                    "configuration error for parameter '{parameter}': {reason}"
                )
            }
            IoError => write!(f, "i/o operation failed"),
            Timeout { operation } => {
                write!(f, "operation '{operation}' timed out")
            }

            Other { description } => {
                write!(f, "other error: {description}")
            }
        }
    }
}

impl error::Error for ParserdError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.0
            .source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn error::Error + 'static))
    }
}

impl From<postgres::Error> for ParserdError {
    fn from(err: postgres::Error) -> Self {
        let description = err.to_string();

        // Database-specific errors carry a SQLSTATE; classify by class.
        if let Some(db_err) = err.as_db_error() {
            match db_err.code().code() {
                // Connection errors (Class 08)
                "08000" | "08003" | "08006" => Self::with_source(ErrorKind::ConnectionLost, err),
                "08001" | "08004" => Self::with_source(
                    ErrorKind::ConnectionFailed {
                        host: "unknown".to_string(),
                        port: 5432,
                        database: "unknown".to_string(),
                    },
                    err,
                ),

                // Authentication errors (Class 28)
                "28000" | "28P01" => Self::with_source(
                    ErrorKind::AuthenticationFailed {
                        user: "unknown".to_string(),
                        database: "unknown".to_string(),
                    },
                    err,
                ),

                // Transaction state errors (Class 25) and rollbacks (Class 40)
                "25000" | "25001" | "25P01" | "25P02" | "40001" | "40002" | "40003" | "40P01" => {
                    Self::with_source(ErrorKind::TransactionFailed, err)
                }

                // System resource errors (Class 53)
                "53000" | "53100" | "53200" | "53300" | "53400" => Self::with_source(
                    ErrorKind::ResourceLimitExceeded {
                        resource: match db_err.code().code() {
                            "53100" => "disk_space".to_string(),
                            "53200" => "memory".to_string(),
                            "53300" => "connections".to_string(),
                            _ => "system_resources".to_string(),
                        },
                    },
                    err,
                ),

                // Query canceled / server shutdown (Class 57)
                "57014" => Self::with_source(
                    ErrorKind::Timeout {
                        operation: "query".to_string(),
                    },
                    err,
                ),
                "57000" | "57P01" | "57P02" | "57P03" => {
                    Self::with_source(ErrorKind::ConnectionLost, err)
                }

                // Generic query execution error for unhandled cases
                _ => Self::with_source(
                    ErrorKind::QueryExecutionFailed {
                        operation: "statement".to_string(),
                    },
                    err,
                ),
            }
        } else {
            // Non-database errors (connection issues, etc.)
            if err.is_closed() || description.contains("connection") {
                Self::with_source(ErrorKind::ConnectionLost, err)
            } else if description.contains("authentication") || description.contains("password") {
                Self::with_source(
                    ErrorKind::AuthenticationFailed {
                        user: "unknown".to_string(),
                        database: "unknown".to_string(),
                    },
                    err,
                )
            } else if description.contains("timeout") {
                Self::with_source(
                    ErrorKind::Timeout {
                        operation: "connection".to_string(),
                    },
                    err,
                )
            } else {
                Self::with_source(ErrorKind::Other { description }, err)
            }
        }
    }
}

impl From<std::io::Error> for ParserdError {
    fn from(err: std::io::Error) -> Self {
        Self::with_source(ErrorKind::IoError, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_trouble_is_retryable() {
        let err = ParserdError::new(ErrorKind::ConnectionLost);
        assert!(err.is_retryable());

        let err = ParserdError::report_persist_failed(SubmissionId::new(3));
        assert_eq!(err.recovery_strategy(), RecoveryStrategy::RetryWithBackoff);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let err = ParserdError::new(ErrorKind::AuthenticationFailed {
            user: "rtevparser".to_string(),
            database: "rteval".to_string(),
        });
        assert_eq!(err.recovery_strategy(), RecoveryStrategy::NoRetry);

        let err = ParserdError::configuration("xsltpath", "directory does not exist");
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_includes_submission_id() {
        let err = ParserdError::report_persist_failed(SubmissionId::new(42));
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn source_chain_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = ParserdError::with_source(ErrorKind::IoError, io);
        assert!(error::Error::source(&err).is_some());
    }
}
