//! Client-level events.

use crate::connection::Notice;

/// An event published on [`PooledClient::events`](crate::PooledClient::events).
///
/// Events are informational. Every failure reported here is also returned to
/// the caller whose operation caused it, except for rollback failures, which
/// are reported here only because the caller receives the original error.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ClientEvent {
    /// A statement was rejected or failed.
    QueryError {
        /// The rendered statement.
        statement: String,
        /// Error message.
        message: String,
    },
    /// A pooled connection reported an asynchronous error.
    ConnectionError {
        /// Error message.
        message: String,
    },
    /// A server notice raised on a pooled connection.
    Notice(Notice),
    /// `ROLLBACK` failed after a transaction body returned an error.
    RollbackFailed {
        /// Error message from the failed rollback.
        message: String,
    },
}

impl ClientEvent {
    /// Check if this event reports a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Notice(_))
    }
}
