use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote API returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Malformed incident {number}: {reason}")]
    MalformedIncident { number: String, reason: String },

    #[error("Unknown incident status code: {0}")]
    UnknownStatusCode(i64),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Schedule(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the next scheduled cycle can be expected to succeed where this
    /// one failed. Sync-path failures leave the watermark untouched, so the
    /// same window is fetched again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Remote { .. }
                | Error::MalformedResponse(_)
                | Error::MalformedIncident { .. }
                | Error::UnknownStatusCode(_)
                | Error::Database(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for Error {
    fn from(e: tokio_cron_scheduler::JobSchedulerError) -> Self {
        Error::Schedule(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_errors_are_retryable() {
        assert!(Error::Transport("timeout".into()).is_retryable());
        assert!(Error::Remote {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(Error::MalformedResponse("no result".into()).is_retryable());
        assert!(Error::UnknownStatusCode(-1).is_retryable());
    }

    #[test]
    fn test_config_errors_are_not_retryable() {
        assert!(!Error::Config("missing url".into()).is_retryable());
        assert!(!Error::Schedule("bad cron".into()).is_retryable());
    }

    #[test]
    fn test_remote_error_display() {
        let e = Error::Remote {
            status: 401,
            body: "unauthorized".into(),
        };
        assert_eq!(e.to_string(), "Remote API returned HTTP 401: unauthorized");
    }
}
