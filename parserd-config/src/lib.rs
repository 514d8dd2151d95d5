//! Configuration for the rteval submission-queue parser daemon.
//!
//! The daemon is configured from two sources: command line options (worker
//! count, log sink, log level, paths to the configuration and PID files) and
//! the shared rteval configuration file, an INI document read by every rteval
//! service. The [`load`] module reads and deserializes the file; the [`shared`]
//! module holds the configuration types consumed by the rest of the workspace.

pub mod load;
pub mod shared;

pub use load::{LoadConfigError, load_file_config};
