use std::time::{Duration, Instant};

use parserd::error::{ErrorKind, ParserdError, ParserdResult};
use parserd::gateway::{DbGateway, NotifyWait, SessionFactory};
use parserd::shutdown::ShutdownView;
use parserd::types::{ClientId, ParseJob, ReportRow, SubmissionId};
use parserd_config::shared::PgConnectionConfig;
use postgres::fallible_iterator::FallibleIterator;
use postgres::types::ToSql;
use postgres::{Client, NoTls};
use secrecy::ExposeSecret;
use tracing::{debug, warn};

const APPLICATION_NAME: &str = "rteval-parserd";

// The notification socket is polled in bounded slices so shutdown is
// observed within a couple of seconds even with no traffic on the channel.
const NOTIFY_POLL_QUANTUM: Duration = Duration::from_secs(1);

/// Claims the oldest pending submission and transitions it in one statement;
/// the row lock makes this race-safe against concurrent claimers.
const CLAIM_SQL: &str = "\
UPDATE submissionqueue
   SET status = 'claimed'
 WHERE submid = (
       SELECT submid
         FROM submissionqueue
        WHERE status = 'pending'
        ORDER BY submid
          FOR UPDATE SKIP LOCKED
        LIMIT 1)
RETURNING submid, clientid, filename";

const SET_STATUS_SQL: &str =
    "UPDATE submissionqueue SET status = $1, reason = $2 WHERE submid = $3";

const MARK_SUCCEEDED_SQL: &str =
    "UPDATE submissionqueue SET status = 'succeeded', reason = NULL WHERE submid = $1";

/// Opens [`PgGateway`] sessions from the shared connection settings.
pub struct PgSessionFactory {
    config: PgConnectionConfig,
}

impl PgSessionFactory {
    pub fn new(config: PgConnectionConfig) -> Self {
        Self { config }
    }
}

impl SessionFactory for PgSessionFactory {
    fn connect(&self) -> ParserdResult<Box<dyn DbGateway>> {
        Ok(Box::new(PgGateway::connect(self.config.clone())?))
    }
}

/// One blocking Postgres session.
pub struct PgGateway {
    client: Client,
    config: PgConnectionConfig,
    listening: Option<String>,
}

impl PgGateway {
    /// Opens a new session. Fails when the database is unavailable.
    pub fn connect(config: PgConnectionConfig) -> ParserdResult<Self> {
        let client = open_client(&config)?;
        debug!(
            host = config.host,
            port = config.port,
            dbname = config.name,
            "database session opened"
        );
        Ok(Self {
            client,
            config,
            listening: None,
        })
    }

    /// Re-opens the underlying connection and re-subscribes to the
    /// notification channel the session was listening on.
    fn reconnect(&mut self) -> ParserdResult<()> {
        warn!(
            host = self.config.host,
            dbname = self.config.name,
            "database connection lost, reconnecting"
        );
        self.client = open_client(&self.config)?;

        if let Some(channel) = self.listening.take() {
            self.listen(&channel)?;
        }
        Ok(())
    }

    fn listen(&mut self, channel: &str) -> ParserdResult<()> {
        validate_channel_name(channel)?;
        self.client
            .batch_execute(&format!("LISTEN {channel}"))
            .map_err(|err| {
                ParserdError::with_source(
                    ErrorKind::NotificationWaitFailed {
                        channel: channel.to_string(),
                    },
                    err,
                )
            })?;
        self.listening = Some(channel.to_string());
        Ok(())
    }

    fn ensure_listening(&mut self, channel: &str) -> ParserdResult<()> {
        if self.listening.as_deref() != Some(channel) {
            self.listen(channel)?;
        }
        Ok(())
    }

    /// Runs a worker-facing statement, reconnecting once if the connection
    /// dropped underneath it.
    fn execute_with_reconnect<T>(
        &mut self,
        run: impl Fn(&mut Client) -> Result<T, postgres::Error>,
    ) -> Result<T, postgres::Error> {
        match run(&mut self.client) {
            Err(err) if err.is_closed() => {
                if let Err(reconnect_err) = self.reconnect() {
                    warn!(error = %reconnect_err, "reconnect failed");
                    return Err(err);
                }
                run(&mut self.client)
            }
            other => other,
        }
    }
}

impl DbGateway for PgGateway {
    fn claim_next_submission(&mut self) -> ParserdResult<Option<ParseJob>> {
        let row = self
            .client
            .query_opt(CLAIM_SQL, &[])
            .map_err(|err| ParserdError::with_source(ErrorKind::ClaimFailed, err))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let submid: i32 = row.get(0);
        let clientid: String = row.get(1);
        let filename: String = row.get(2);

        Ok(Some(ParseJob::new(
            SubmissionId::new(submid),
            ClientId::from(clientid),
            filename,
        )))
    }

    fn wait_for_notification(
        &mut self,
        channel: &str,
        shutdown: &ShutdownView,
        timeout: Option<Duration>,
    ) -> ParserdResult<NotifyWait> {
        self.ensure_listening(channel)?;
        let deadline = timeout.map(|t| Instant::now() + t);

        loop {
            if shutdown.is_shutdown() {
                return Ok(NotifyWait::Shutdown);
            }
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                return Ok(NotifyWait::TimedOut);
            }

            let mut notifications = self.client.notifications();
            let mut pending = notifications.timeout_iter(NOTIFY_POLL_QUANTUM);
            match pending.next() {
                Ok(Some(notification)) => {
                    if notification.channel() == channel {
                        return Ok(NotifyWait::Notified);
                    }
                    // A notification for a channel we are not interested in;
                    // keep waiting.
                    debug!(
                        channel = notification.channel(),
                        "ignoring notification for unrelated channel"
                    );
                }
                Ok(None) => {
                    // Quantum elapsed; loop to re-check shutdown and deadline.
                }
                Err(err) => {
                    return Err(ParserdError::with_source(
                        ErrorKind::NotificationWaitFailed {
                            channel: channel.to_string(),
                        },
                        err,
                    ));
                }
            }
        }
    }

    fn mark_in_progress(&mut self, submission_id: SubmissionId) -> ParserdResult<()> {
        self.set_status(submission_id, "in_progress", None)
    }

    fn persist_report(
        &mut self,
        submission_id: SubmissionId,
        rows: &[ReportRow],
    ) -> ParserdResult<()> {
        let statements: Vec<(String, Vec<String>)> = rows
            .iter()
            .map(|row| (insert_sql(row), row.values.iter().map(|(_, v)| v.clone()).collect()))
            .collect();

        self.execute_with_reconnect(|client| {
            let mut tx = client.transaction()?;
            for (sql, values) in &statements {
                let params: Vec<&(dyn ToSql + Sync)> =
                    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect();
                tx.execute(sql.as_str(), &params)?;
            }
            tx.execute(MARK_SUCCEEDED_SQL, &[&submission_id.into_inner()])?;
            tx.commit()
        })
        .map_err(|err| {
            ParserdError::with_source(ErrorKind::ReportPersistFailed { submission_id }, err)
        })?;

        Ok(())
    }

    fn mark_failed(&mut self, submission_id: SubmissionId, reason: &str) -> ParserdResult<()> {
        self.set_status(submission_id, "failed", Some(reason))
    }

    fn mark_rejected(&mut self, submission_id: SubmissionId, reason: &str) -> ParserdResult<()> {
        self.set_status(submission_id, "rejected", Some(reason))
    }
}

impl PgGateway {
    fn set_status(
        &mut self,
        submission_id: SubmissionId,
        status: &str,
        reason: Option<&str>,
    ) -> ParserdResult<()> {
        self.execute_with_reconnect(|client| {
            client.execute(
                SET_STATUS_SQL,
                &[&status, &reason, &submission_id.into_inner()],
            )
        })
        .map_err(|err| {
            ParserdError::with_source(
                ErrorKind::StatusUpdateFailed {
                    submission_id,
                    status: status.to_string(),
                },
                err,
            )
        })?;

        Ok(())
    }
}

fn open_client(config: &PgConnectionConfig) -> ParserdResult<Client> {
    let mut pg_config = postgres::Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .dbname(&config.name)
        .user(&config.user)
        .application_name(APPLICATION_NAME);

    if let Some(password) = &config.password {
        pg_config.password(password.expose_secret());
    }

    pg_config.connect(NoTls).map_err(|err| {
        ParserdError::with_source(
            ErrorKind::ConnectionFailed {
                host: config.host.clone(),
                port: config.port,
                database: config.name.clone(),
            },
            err,
        )
    })
}

/// `LISTEN` takes an identifier, not a parameter; restrict the channel name
/// so it can be interpolated safely.
fn validate_channel_name(channel: &str) -> ParserdResult<()> {
    let valid = !channel.is_empty()
        && channel
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ParserdError::configuration(
            "channel",
            format!("`{channel}` is not a valid notification channel name"),
        ))
    }
}

fn insert_sql(row: &ReportRow) -> String {
    let columns: Vec<String> = row
        .values
        .iter()
        .map(|(column, _)| quote_ident(column))
        .collect();
    let placeholders: Vec<String> = (1..=row.values.len()).map(|i| format!("${i}")).collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&row.table),
        columns.join(", "),
        placeholders.join(", ")
    )
}

fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ReportRow {
        ReportRow {
            table: "report_summary".to_string(),
            values: vec![
                ("submid".to_string(), "7".to_string()),
                ("clientid".to_string(), "client-a".to_string()),
            ],
        }
    }

    #[test]
    fn insert_sql_quotes_identifiers_and_numbers_placeholders() {
        assert_eq!(
            insert_sql(&row()),
            "INSERT INTO \"report_summary\" (\"submid\", \"clientid\") VALUES ($1, $2)"
        );
    }

    #[test]
    fn quote_ident_escapes_embedded_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("odd\"name"), "\"odd\"\"name\"");
    }

    #[test]
    fn channel_names_are_restricted() {
        assert!(validate_channel_name("rteval_submq").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name("bad-channel").is_err());
        assert!(validate_channel_name("drop table; --").is_err());
    }

    #[test]
    fn claim_sql_orders_fifo_and_skips_locked_rows() {
        assert!(CLAIM_SQL.contains("ORDER BY submid"));
        assert!(CLAIM_SQL.contains("FOR UPDATE SKIP LOCKED"));
        assert!(CLAIM_SQL.contains("status = 'pending'"));
    }
}
