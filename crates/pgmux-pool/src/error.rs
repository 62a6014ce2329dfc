//! Pool error types.

use std::convert::Infallible;

use thiserror::Error;

/// Errors that can occur during pool operations.
///
/// `E` is the error type of the pool's [`ConnectionFactory`](crate::ConnectionFactory).
/// Errors that can never carry a factory failure (configuration checks) use
/// the default `Infallible` parameter.
#[derive(Debug, Error)]
pub enum PoolError<E = Infallible> {
    /// Pool is closed or draining.
    #[error("pool is closed")]
    PoolClosed,

    /// Connection creation failed.
    ///
    /// The slot reserved for the new connection is freed before this error is
    /// returned.
    #[error("failed to create connection: {0}")]
    ConnectionCreation(#[source] E),

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),
}

impl PoolError {
    /// Convert a factory-independent error into one for a concrete factory.
    pub(crate) fn widen<E>(self) -> PoolError<E> {
        match self {
            Self::PoolClosed => PoolError::PoolClosed,
            Self::Configuration(msg) => PoolError::Configuration(msg),
            Self::ConnectionCreation(never) => match never {},
        }
    }
}

impl<E> PoolError<E> {
    /// Check if this error was caused by the pool being closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Extract the factory error, if this is a creation failure.
    pub fn into_creation_error(self) -> Option<E> {
        match self {
            Self::ConnectionCreation(e) => Some(e),
            _ => None,
        }
    }
}
