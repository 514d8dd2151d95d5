use secrecy::SecretString;
use serde::Deserialize;

/// Connection settings for the Postgres instance holding the submission queue
/// and report tables.
///
/// Read from the `[database]` section of the rteval configuration file. This
/// intentionally does not implement [`serde::Serialize`] so the password can
/// never leak into a serialized form.
#[derive(Debug, Clone, Deserialize)]
pub struct PgConnectionConfig {
    /// Database server hostname.
    pub host: String,
    /// Database server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name.
    pub name: String,
    /// User to authenticate as.
    pub user: String,
    /// Password, when the server requires one.
    #[serde(default)]
    pub password: Option<SecretString>,
}

fn default_port() -> u16 {
    5432
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_defaults_to_postgres() {
        let config: PgConnectionConfig = serde_json::from_str(
            r#"{"host": "db.example.org", "name": "rteval", "user": "rtevparser"}"#,
        )
        .unwrap();

        assert_eq!(config.port, 5432);
        assert!(config.password.is_none());
    }
}
