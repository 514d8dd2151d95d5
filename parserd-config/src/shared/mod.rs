mod connection;
mod logging;
mod pipeline;
mod retry;

pub use connection::PgConnectionConfig;
pub use logging::{LogLevel, LogSink, ParseLogOptionError, SyslogFacility};
pub use pipeline::PipelineConfig;
pub use retry::RetryConfig;

use thiserror::Error;

/// Error raised when a configuration value fails validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A field holds a value outside its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue {
        field: String,
        constraint: String,
    },
}
