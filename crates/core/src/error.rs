//! Unified error types for metacrawl.
//!
//! The display strings carry a stable upper-case code prefix so log lines and
//! CLI output can be grepped by failure class.

use tokio_rusqlite::rusqlite;

use crate::config::ConfigError;
use crate::integrity::IntegrityError;

/// Unified error type for the storage and integrity layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// SQLite rejected a statement.
    #[error("DB_ERROR: {0}")]
    Database(#[from] rusqlite::Error),

    /// The background connection thread is gone.
    #[error("DB_ERROR: connection unavailable: {0}")]
    Connection(String),

    /// Migration failed to apply.
    #[error("DB_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be decoded.
    #[error("DB_ERROR: corrupt row: {0}")]
    CorruptRow(String),

    /// JSON (de)serialization of a stored payload failed.
    #[error("SERIALIZATION_ERROR: {0}")]
    Serialization(String),

    /// Integrity hashing could not be performed.
    #[error("INTEGRITY_ERROR: {0}")]
    Integrity(#[from] IntegrityError),

    /// Cache store failure unrelated to the database (e.g. a poisoned backend).
    #[error("CACHE_ERROR: {0}")]
    Cache(String),

    /// Configuration could not be loaded or is invalid.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    /// No row found for the given identifier.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
}

impl Error {
    /// Failures of the connection itself rather than of a statement.
    fn from_connection<E: std::fmt::Display>(err: tokio_rusqlite::Error<E>) -> Self {
        match err {
            tokio_rusqlite::Error::ConnectionClosed => Error::Connection("closed".into()),
            tokio_rusqlite::Error::Close((_, e)) => Error::Connection(format!("close failed: {e}")),
            other => Error::Connection(other.to_string()),
        }
    }
}

/// Errors returned from `Connection::call` closures pass through unchanged.
impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(inner) => inner,
            other => Error::from_connection(other),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => Error::Database(e),
            other => Error::from_connection(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("run 42".to_string());
        assert!(err.to_string().contains("NOT_FOUND"));
        assert!(err.to_string().contains("run 42"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse_err.into();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(err.to_string().starts_with("SERIALIZATION_ERROR"));
    }

    #[test]
    fn test_rusqlite_error_conversion() {
        let err: Error = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.to_string().starts_with("DB_ERROR"));
    }

    #[test]
    fn test_call_errors_are_flattened() {
        let inner = Error::NotFound("indexing run 7".into());
        let err: Error = tokio_rusqlite::Error::Error(inner).into();
        assert!(matches!(err, Error::NotFound(_)));

        let err: Error = tokio_rusqlite::Error::<rusqlite::Error>::Error(rusqlite::Error::InvalidQuery).into();
        assert!(matches!(err, Error::Database(rusqlite::Error::InvalidQuery)));
    }

    #[test]
    fn test_closed_connection_conversion() {
        let err: Error = tokio_rusqlite::Error::<Error>::ConnectionClosed.into();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(err.to_string(), "DB_ERROR: connection unavailable: closed");
    }
}
