//! Backend connection contract.
//!
//! The client never speaks a wire protocol itself. A [`Connector`] opens
//! [`Connection`]s; each connection executes statements one at a time and
//! publishes asynchronous backend events (errors, notices, notifications) on
//! a broadcast channel.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{Error, Result};

/// Opens backend connections.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Open and authenticate a new connection.
    async fn connect(&self, config: &Config) -> Result<Self::Connection>;
}

/// A single authenticated link to the backend.
#[async_trait::async_trait]
pub trait Connection: Send + 'static {
    /// Execute a fully rendered statement.
    ///
    /// The statement may contain several `;`-separated commands; the result
    /// describes the last row-returning one.
    async fn execute(&mut self, statement: &str) -> Result<QueryResult>;

    /// Subscribe to the connection's asynchronous events.
    fn events(&self) -> broadcast::Receiver<ConnectionEvent>;

    /// Whether the session has ended, either by [`close`](Self::close) or
    /// because of a fatal error.
    fn is_closed(&self) -> bool;

    /// End the session.
    async fn close(&mut self);
}

/// An asynchronous event pushed by the backend.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// The session failed; the connection is unusable.
    Error(String),
    /// A notice message raised by the server.
    Notice(Notice),
    /// A `NOTIFY` delivered to a channel this session listens on.
    Notification(Notification),
}

/// A notice raised by the server (`RAISE NOTICE`, warnings).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Severity, e.g. `NOTICE` or `WARNING`.
    pub severity: String,
    /// SQLSTATE code.
    pub code: String,
    /// Message text.
    pub message: String,
}

/// A raw notification as received from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Backend process id of the notifying session.
    pub process_id: i32,
    /// Channel the notification was sent on.
    pub channel: String,
    /// Undecoded payload.
    pub payload: String,
}

/// Rows and command status returned by a statement.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    columns: Arc<[String]>,
    rows: Vec<Row>,
    rows_affected: u64,
}

impl QueryResult {
    /// Build a result from column names and text-format rows.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>, rows_affected: u64) -> Self {
        let columns: Arc<[String]> = columns.into();
        let rows = rows
            .into_iter()
            .map(|values| Row {
                columns: Arc::clone(&columns),
                values,
            })
            .collect();
        Self {
            columns,
            rows,
            rows_affected,
        }
    }

    /// Build a result for a command that returns no rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    /// Column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returned rows.
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// The first row, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Number of rows returned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether no rows were returned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows affected by the command, as reported by the server.
    #[must_use]
    pub fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    /// Consume the result, returning its rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// A result row in text format.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Row {
    /// Get a column by name. `None` if the column is missing or `NULL`.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        self.get_idx(idx)
    }

    /// Get a column by position. `None` if out of range or `NULL`.
    #[must_use]
    pub fn get_idx(&self, idx: usize) -> Option<&str> {
        self.values.get(idx)?.as_deref()
    }

    /// Parse a column into `T`.
    pub fn parse<T>(&self, column: &str) -> Result<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let text = self
            .get(column)
            .ok_or_else(|| Error::Column(format!("column {column} is missing or null")))?;
        text.parse()
            .map_err(|e| Error::Column(format!("column {column}: {e}")))
    }

    /// Read a boolean column in the server's text format (`t`/`f`).
    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.get(column) {
            Some("t" | "true") => Ok(true),
            Some("f" | "false") => Ok(false),
            Some(other) => Err(Error::Column(format!(
                "column {column}: {other:?} is not a boolean"
            ))),
            None => Err(Error::Column(format!("column {column} is missing or null"))),
        }
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> QueryResult {
        QueryResult::new(
            vec!["value".into(), "name".into()],
            vec![
                vec![Some("1".into()), Some("potato".into())],
                vec![Some("t".into()), None],
            ],
            2,
        )
    }

    #[test]
    fn test_row_access_by_name_and_index() {
        let result = sample();
        assert_eq!(result.len(), 2);
        assert_eq!(result.columns(), ["value", "name"]);

        let row = result.first().unwrap();
        assert_eq!(row.get("name"), Some("potato"));
        assert_eq!(row.get_idx(0), Some("1"));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.parse::<i32>("value").unwrap(), 1);
    }

    #[test]
    fn test_null_and_bool_columns() {
        let result = sample();
        let row = &result.rows()[1];
        assert_eq!(row.get("name"), None);
        assert!(row.get_bool("value").unwrap());
        assert!(matches!(row.parse::<i32>("name"), Err(Error::Column(_))));
    }

    #[test]
    fn test_affected_only_result() {
        let result = QueryResult::affected(3);
        assert!(result.is_empty());
        assert_eq!(result.rows_affected(), 3);
    }
}
