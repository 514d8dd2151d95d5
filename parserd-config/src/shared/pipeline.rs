use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::shared::{RetryConfig, ValidationError};

/// Configuration for the parsing pipeline: the producer loop, the bounded job
/// queue and the worker pool.
///
/// Read from the `[xmlrpc_parser]` section of the rteval configuration file,
/// with the worker count overridable from the command line.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Directory containing the `xmlparser.xsl` stylesheet.
    pub xsltpath: PathBuf,
    /// Root directory under which per-client report subtrees are written.
    pub reportdir: PathBuf,
    /// Number of worker threads. When absent, one worker per CPU core.
    #[serde(default)]
    pub threads: Option<usize>,
    /// Capacity of the in-memory job queue. When absent, the capacity is
    /// taken from the system message-queue hint.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
    /// How long the producer backs off when the job queue is full.
    ///
    /// Specified in milliseconds for serialization compatibility.
    /// Default: 60000ms (60 seconds)
    #[serde(
        default = "default_queue_full_backoff_ms",
        rename = "queue_full_backoff_ms"
    )]
    pub queue_full_backoff_ms: u64,
    /// Retry schedule for transient database failures inside workers.
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_queue_full_backoff_ms() -> u64 {
    PipelineConfig::DEFAULT_QUEUE_FULL_BACKOFF_MS
}

impl PipelineConfig {
    /// Default producer backoff when the job queue is full.
    pub const DEFAULT_QUEUE_FULL_BACKOFF_MS: u64 = 60000;

    /// Returns the queue-full backoff as a [`Duration`].
    pub fn queue_full_backoff(&self) -> Duration {
        Duration::from_millis(self.queue_full_backoff_ms)
    }

    /// Validates pipeline configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.threads == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "threads".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.queue_capacity == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "queue_capacity".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.max_attempts".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "retry.backoff_multiplier".to_string(),
                constraint: "must be >= 1.0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> PipelineConfig {
        PipelineConfig {
            xsltpath: PathBuf::from("/usr/share/rteval"),
            reportdir: PathBuf::from("/var/lib/rteval/reports"),
            threads: None,
            queue_capacity: None,
            queue_full_backoff_ms: default_queue_full_backoff_ms(),
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn rejects_zero_workers() {
        let mut config = minimal();
        config.threads = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let mut config = minimal();
        config.queue_capacity = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let mut config = minimal();
        config.retry.backoff_multiplier = 0.5;
        assert!(config.validate().is_err());
    }
}
