//! Client error types.

use pgmux_pool::PoolError;
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server rejected a statement.
    #[error("query error: {message}")]
    Query {
        /// Server error message.
        message: String,
        /// SQLSTATE code, when the server supplied one.
        code: Option<String>,
    },

    /// The session broke outside of a server-reported error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Statement template could not be rendered.
    #[error("format error: {0}")]
    Format(String),

    /// A result column was missing or could not be parsed.
    #[error("column error: {0}")]
    Column(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A statement failed inside a transaction whose body still returned
    /// `Ok`. The transaction was rolled back instead of committed.
    #[error("transaction aborted by a failed statement and rolled back")]
    TransactionAborted,

    /// The client's pool has been closed.
    #[error("pool is closed")]
    PoolClosed,
}

impl Error {
    /// Check if this error is transient and may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::ConnectionClosed | Self::Protocol(_)
        )
    }

    /// Check if the server rejected a statement.
    #[must_use]
    pub fn is_query_error(&self) -> bool {
        matches!(self, Self::Query { .. })
    }

    /// Get the SQLSTATE code if this is a server error.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Query { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Build a query error without a SQLSTATE code.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            code: None,
        }
    }
}

impl From<PoolError<Error>> for Error {
    fn from(err: PoolError<Error>) -> Self {
        match err {
            PoolError::PoolClosed => Self::PoolClosed,
            PoolError::ConnectionCreation(e) => e,
            PoolError::Configuration(msg) => Self::Config(msg),
        }
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_conversion_unwraps_creation_failure() {
        let err = Error::from(PoolError::ConnectionCreation(Error::Connect("refused".into())));
        assert!(matches!(err, Error::Connect(ref m) if m == "refused"));

        let err = Error::from(PoolError::<Error>::PoolClosed);
        assert!(matches!(err, Error::PoolClosed));
    }

    #[test]
    fn test_query_error_accessors() {
        let err = Error::Query {
            message: "relation \"missing\" does not exist".into(),
            code: Some("42P01".into()),
        };
        assert!(err.is_query_error());
        assert!(!err.is_transient());
        assert_eq!(err.code(), Some("42P01"));
        assert_eq!(
            err.to_string(),
            "query error: relation \"missing\" does not exist"
        );
    }

    #[test]
    fn test_transaction_aborted_is_not_transient() {
        assert!(!Error::TransactionAborted.is_transient());
        assert!(Error::TransactionAborted.to_string().contains("rolled back"));
    }

    #[test]
    fn test_transient_errors() {
        assert!(Error::ConnectionClosed.is_transient());
        assert!(Error::Connect("timeout".into()).is_transient());
        assert!(!Error::PoolClosed.is_transient());
    }
}
