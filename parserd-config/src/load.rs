use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::shared::{PgConnectionConfig, PipelineConfig, ValidationError};

/// Contents of the shared rteval configuration file relevant to the parser
/// daemon.
///
/// The file is an INI document; the parser daemon reads its own
/// `[xmlrpc_parser]` section plus the `[database]` section shared with the
/// other rteval services.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    /// Parser pipeline settings.
    pub xmlrpc_parser: PipelineConfig,
    /// Database connection settings.
    pub database: PgConnectionConfig,
}

/// Errors that can occur while loading the configuration file.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// The configuration file does not exist.
    #[error("configuration file `{0}` does not exist")]
    MissingConfigurationFile(PathBuf),

    /// The configuration file could not be read or parsed.
    #[error("failed to read configuration file `{path}`")]
    Read {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    /// The configuration file was parsed but deserialization failed.
    #[error("failed to deserialize configuration file `{path}`")]
    Deserialization {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    /// A configuration value failed validation.
    #[error("invalid configuration in `{path}`")]
    Validation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
}

/// Loads and validates the rteval configuration file at `path`.
pub fn load_file_config(path: &Path) -> Result<FileConfig, LoadConfigError> {
    if !path.is_file() {
        return Err(LoadConfigError::MissingConfigurationFile(
            path.to_path_buf(),
        ));
    }

    let source = config::File::from(path.to_path_buf()).format(config::FileFormat::Ini);
    let settings = config::Config::builder()
        .add_source(source)
        .build()
        .map_err(|source| LoadConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let file_config: FileConfig =
        settings
            .try_deserialize()
            .map_err(|source| LoadConfigError::Deserialization {
                path: path.to_path_buf(),
                source,
            })?;

    file_config
        .xmlrpc_parser
        .validate()
        .map_err(|source| LoadConfigError::Validation {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(file_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;
    use tempfile::TempDir;

    const SAMPLE: &str = "\
[xmlrpc_parser]
xsltpath = /usr/share/rteval
reportdir = /var/lib/rteval/reports
threads = 4

[database]
host = db.example.org
name = rteval
user = rtevparser
password = secret
";

    #[test]
    fn loads_sample_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rteval.conf");
        fs::write(&path, SAMPLE).unwrap();

        let loaded = load_file_config(&path).unwrap();

        assert_eq!(loaded.xmlrpc_parser.xsltpath.to_str(), Some("/usr/share/rteval"));
        assert_eq!(loaded.xmlrpc_parser.threads, Some(4));
        assert_eq!(
            loaded.xmlrpc_parser.queue_full_backoff_ms,
            PipelineConfig::DEFAULT_QUEUE_FULL_BACKOFF_MS
        );
        assert_eq!(loaded.database.host, "db.example.org");
        assert_eq!(loaded.database.port, 5432);
        assert_eq!(
            loaded.database.password.as_ref().unwrap().expose_secret(),
            "secret"
        );
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nonexistent.conf");

        assert!(matches!(
            load_file_config(&path),
            Err(LoadConfigError::MissingConfigurationFile(_))
        ));
    }

    #[test]
    fn missing_section_fails_deserialization() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rteval.conf");
        fs::write(&path, "[database]\nhost = db\nname = rteval\nuser = u\n").unwrap();

        assert!(matches!(
            load_file_config(&path),
            Err(LoadConfigError::Deserialization { .. })
        ));
    }

    #[test]
    fn invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rteval.conf");
        fs::write(
            &path,
            "\
[xmlrpc_parser]
xsltpath = /usr/share/rteval
reportdir = /var/lib/rteval/reports
threads = 0

[database]
host = db
name = rteval
user = u
",
        )
        .unwrap();

        assert!(matches!(
            load_file_config(&path),
            Err(LoadConfigError::Validation { .. })
        ));
    }
}
