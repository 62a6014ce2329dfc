//! Transaction support.
//!
//! Transactions are scoped to a closure passed to
//! [`PooledClient::transaction`](crate::PooledClient::transaction). The
//! closure receives a [`TransactionContext`] bound to the borrowed
//! connection; the client issues `BEGIN`, then `COMMIT` or `ROLLBACK`
//! depending on what the closure returns.

use crate::connection::{Connection, QueryResult};
use crate::error::{Error, Result};
use crate::factory::ClientConnection;
use crate::format::{Param, quote_ident};

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted. PostgreSQL treats this as read committed.
    ReadUncommitted,

    /// Read committed (the server default).
    ///
    /// Each statement sees only data committed before it began.
    #[default]
    ReadCommitted,

    /// Repeatable read.
    ///
    /// All statements see a snapshot taken at the first statement of the
    /// transaction.
    RepeatableRead,

    /// Serializable.
    ///
    /// Transactions that could not have run serially fail with a
    /// serialization error and must be retried.
    Serializable,
}

impl IsolationLevel {
    /// The level's SQL keyword form.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }

    pub(crate) fn begin_sql(&self) -> String {
        format!("BEGIN TRANSACTION ISOLATION LEVEL {}", self.name())
    }
}

/// A savepoint within a transaction.
#[derive(Debug, Clone)]
pub struct SavePoint {
    name: String,
}

impl SavePoint {
    /// Get the savepoint name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Access to the connection inside a transaction.
///
/// Only exists for the duration of one transaction closure. Every statement
/// runs on the same borrowed connection.
pub struct TransactionContext<'c, C> {
    conn: &'c mut ClientConnection<C>,
}

impl<'c, C: Connection> TransactionContext<'c, C> {
    pub(crate) fn new(conn: &'c mut ClientConnection<C>) -> Self {
        Self { conn }
    }

    /// Render a statement template and execute it in the transaction.
    pub async fn query(&mut self, template: &str, params: &[Param<'_>]) -> Result<QueryResult> {
        self.conn.query(template, params).await
    }

    /// Execute a rendered statement in the transaction.
    pub async fn execute(&mut self, statement: &str) -> Result<QueryResult> {
        self.conn.execute(statement).await
    }

    /// Create a savepoint.
    ///
    /// The name must be a plain identifier (letters, digits, underscores,
    /// not starting with a digit).
    pub async fn savepoint(&mut self, name: &str) -> Result<SavePoint> {
        validate_savepoint_name(name)?;
        self.conn
            .execute(&format!("SAVEPOINT {}", quote_ident(name)))
            .await?;
        Ok(SavePoint {
            name: name.to_string(),
        })
    }

    /// Roll back to a savepoint, keeping the transaction open.
    ///
    /// This recovers a transaction aborted by a failed statement: once it
    /// succeeds, the transaction can commit again.
    pub async fn rollback_to(&mut self, savepoint: &SavePoint) -> Result<()> {
        self.conn
            .execute(&format!(
                "ROLLBACK TO SAVEPOINT {}",
                quote_ident(&savepoint.name)
            ))
            .await?;
        self.conn.clear_failure();
        Ok(())
    }

    /// Get the underlying connection.
    pub fn connection(&mut self) -> &mut ClientConnection<C> {
        &mut *self.conn
    }
}

fn validate_savepoint_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(Error::Format(format!("invalid savepoint name: {name:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_statement_names_level() {
        assert_eq!(IsolationLevel::RepeatableRead.name(), "REPEATABLE READ");
        assert_eq!(
            IsolationLevel::Serializable.begin_sql(),
            "BEGIN TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        );
    }

    #[test]
    fn test_server_default_level() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
    }

    #[test]
    fn test_savepoint_names() {
        assert!(validate_savepoint_name("before_items").is_ok());
        assert!(validate_savepoint_name("_sp1").is_ok());
        assert!(validate_savepoint_name("").is_err());
        assert!(validate_savepoint_name("1sp").is_err());
        assert!(validate_savepoint_name("sp; drop table t").is_err());
    }
}
