//! Listener error types.

use thiserror::Error;

/// Errors returned by [`Listener`](crate::Listener) operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listener has been closed.
    #[error("listener is closed")]
    Closed,

    /// The operation is not valid in the listener's current state or for
    /// the given arguments.
    #[error("invalid listener state: {0}")]
    State(String),

    /// The backend rejected a command or the connection failed.
    #[error(transparent)]
    Client(#[from] pgmux_client::Error),
}

impl ListenerError {
    /// Check if this error was caused by the listener being closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Failures reported asynchronously on the listener event channel.
///
/// These happen outside any caller's operation (while dispatching or
/// polling), so they cannot be returned.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ListenerEventError {
    /// A notification payload could not be decoded; it was not delivered.
    #[error("Invalid JSON in notification on {channel}: {message}")]
    DecodeFailed {
        /// Channel the notification arrived on.
        channel: String,
        /// Decoder error message.
        message: String,
    },

    /// A keep-alive poll failed; polling has stopped.
    #[error("keep-alive poll failed: {0}")]
    PollFailed(String),

    /// A subscriber callback panicked. Other subscribers were unaffected.
    #[error("subscriber callback for {channel} panicked")]
    CallbackPanicked {
        /// Channel of the notification being delivered.
        channel: String,
    },

    /// The listening connection reported an error.
    #[error("listener connection error: {0}")]
    Connection(String),

    /// The dispatcher fell behind and notifications were lost.
    #[error("dispatcher lagged, {0} notification(s) lost")]
    Lagged(u64),
}

/// Result type for listener operations.
pub type Result<T> = std::result::Result<T, ListenerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_mentions_invalid_json() {
        let err = ListenerEventError::DecodeFailed {
            channel: "potato".into(),
            message: "key must be a string at line 1 column 3".into(),
        };
        assert!(err.to_string().contains("Invalid JSON"));
    }

    #[test]
    fn test_client_error_is_transparent() {
        let err = ListenerError::from(pgmux_client::Error::query("syntax error"));
        assert_eq!(err.to_string(), "query error: syntax error");
        assert!(!err.is_closed());
        assert!(ListenerError::Closed.is_closed());
    }
}
