//! In-memory mock backend.
//!
//! [`MockServer`] stands in for a PostgreSQL server: it understands
//! transactions, a single-column table model, and `LISTEN`/`NOTIFY`
//! across sessions. Every statement is logged and failures can be injected
//! per statement or per connect, so tests can assert on exactly what the
//! client sent.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgmux_client::{Config, PooledClient};
//! use pgmux_testing::mock_server::{MockResponse, MockServer};
//!
//! let server = MockServer::builder()
//!     .with_response("select 42", MockResponse::scalar("answer", "42"))
//!     .build();
//!
//! let client = PooledClient::new(server.connector(), Config::new())?;
//! let result = client.query("select 42", &[]).await?;
//! assert_eq!(result.first().and_then(|r| r.get("answer")), Some("42"));
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use pgmux_client::{Config, Connection, ConnectionEvent, Connector, Notification, QueryResult};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::sql::{self, Command};

/// Error type for mock server operations.
#[derive(Debug, Clone, Error)]
pub enum MockServerError {
    /// The statement could not be parsed.
    #[error("{0}")]
    Syntax(String),

    /// A failure injected by the test.
    #[error("{0}")]
    Injected(String),

    /// The session was closed or broken.
    #[error("connection closed")]
    Closed,

    /// A connect attempt was refused.
    #[error("connection refused")]
    Refused,
}

impl From<MockServerError> for pgmux_client::Error {
    fn from(err: MockServerError) -> Self {
        match err {
            MockServerError::Syntax(message) => Self::Query {
                message,
                code: Some("42601".into()),
            },
            MockServerError::Injected(message) => Self::Query {
                message,
                code: Some("XX000".into()),
            },
            MockServerError::Closed => Self::ConnectionClosed,
            MockServerError::Refused => Self::Connect("connection refused".into()),
        }
    }
}

/// Result type for mock server operations.
pub type Result<T> = std::result::Result<T, MockServerError>;

/// Canned response for a statement.
#[derive(Clone)]
pub enum MockResponse {
    /// Return rows of text values.
    Rows {
        /// Column names.
        columns: Vec<String>,
        /// Row data.
        rows: Vec<Vec<Option<String>>>,
    },

    /// Return a command status with a row count.
    RowsAffected(u64),

    /// Fail with a server error.
    Error {
        /// Error message.
        message: String,
        /// SQLSTATE code.
        code: String,
    },

    /// Compute the response from the statement.
    Custom(Arc<dyn Fn(&str) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows { columns, rows } => f
                .debug_struct("Rows")
                .field("columns", columns)
                .field("rows", rows)
                .finish(),
            Self::RowsAffected(n) => f.debug_tuple("RowsAffected").field(n).finish(),
            Self::Error { message, code } => f
                .debug_struct("Error")
                .field("message", message)
                .field("code", code)
                .finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// A single row with a single column.
    pub fn scalar(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Rows {
            columns: vec![column.into()],
            rows: vec![vec![Some(value.into())]],
        }
    }

    /// A rows-affected response.
    pub fn affected(count: u64) -> Self {
        Self::RowsAffected(count)
    }

    /// An error response.
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: code.into(),
        }
    }

    /// A multi-row response.
    pub fn rows(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self::Rows { columns, rows }
    }

    fn resolve(&self, statement: &str) -> pgmux_client::Result<QueryResult> {
        match self {
            Self::Rows { columns, rows } => {
                let affected = rows.len() as u64;
                Ok(QueryResult::new(columns.clone(), rows.clone(), affected))
            }
            Self::RowsAffected(n) => Ok(QueryResult::affected(*n)),
            Self::Error { message, code } => Err(pgmux_client::Error::Query {
                message: message.clone(),
                code: Some(code.clone()),
            }),
            Self::Custom(f) => f(statement).resolve(statement),
        }
    }
}

/// An injected statement failure.
#[derive(Debug, Clone)]
struct Failure {
    pattern: String,
    message: String,
    remaining: Option<u32>,
}

/// Configuration for the mock server.
#[derive(Debug, Default)]
pub struct MockServerConfig {
    responses: HashMap<String, MockResponse>,
    failures: Vec<Failure>,
    fail_connects: u32,
    flush_on_traffic: bool,
}

/// Builder for [`MockServer`].
#[derive(Debug, Default)]
pub struct MockServerBuilder {
    config: MockServerConfig,
}

impl MockServerBuilder {
    /// Create a new builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a response for a specific statement (exact match after trimming
    /// whitespace and trailing semicolons).
    #[must_use]
    pub fn with_response(mut self, sql: impl Into<String>, response: MockResponse) -> Self {
        self.config.responses.insert(normalize(&sql.into()), response);
        self
    }

    /// Fail every statement containing `pattern`.
    #[must_use]
    pub fn fail_statement(mut self, pattern: impl Into<String>, message: impl Into<String>) -> Self {
        self.config.failures.push(Failure {
            pattern: pattern.into(),
            message: message.into(),
            remaining: None,
        });
        self
    }

    /// Refuse the next `count` connect attempts.
    #[must_use]
    pub fn fail_next_connects(mut self, count: u32) -> Self {
        self.config.fail_connects = count;
        self
    }

    /// Hold notifications until the receiving session executes a statement.
    ///
    /// Models servers that only flush asynchronous messages when the client
    /// sends traffic.
    #[must_use]
    pub fn flush_notifications_on_traffic(mut self, enabled: bool) -> Self {
        self.config.flush_on_traffic = enabled;
        self
    }

    /// Build the server.
    #[must_use]
    pub fn build(self) -> MockServer {
        MockServer::start(self.config)
    }
}

/// An in-memory mock backend.
///
/// Cloning yields a handle to the same server.
#[derive(Clone)]
pub struct MockServer {
    inner: Arc<ServerInner>,
}

struct ServerInner {
    responses: HashMap<String, MockResponse>,
    flush_on_traffic: bool,
    state: Mutex<ServerState>,
}

#[derive(Default)]
struct ServerState {
    sessions: HashMap<i32, Session>,
    tables: HashMap<String, Vec<String>>,
    statements: Vec<String>,
    listens: HashMap<String, u32>,
    unlistens: HashMap<String, u32>,
    failures: Vec<Failure>,
    fail_connects: u32,
    connects: u64,
    closes: u64,
    next_pid: i32,
}

struct Session {
    events: broadcast::Sender<ConnectionEvent>,
    closed: Arc<AtomicBool>,
    listening: HashSet<String>,
    pending: Vec<Notification>,
}

impl MockServer {
    /// Create a new builder for the mock server.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// Start a server from a configuration.
    #[must_use]
    pub fn start(config: MockServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                responses: config.responses,
                flush_on_traffic: config.flush_on_traffic,
                state: Mutex::new(ServerState {
                    failures: config.failures,
                    fail_connects: config.fail_connects,
                    next_pid: 1000,
                    ..ServerState::default()
                }),
            }),
        }
    }

    /// A connector opening sessions on this server.
    #[must_use]
    pub fn connector(&self) -> MockConnector {
        MockConnector {
            server: self.clone(),
        }
    }

    /// Open a session directly.
    pub fn connect(&self, event_capacity: usize) -> Result<MockConnection> {
        let mut state = self.inner.state.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            tracing::debug!("mock server refusing connection");
            return Err(MockServerError::Refused);
        }

        state.next_pid += 1;
        let pid = state.next_pid;
        state.connects += 1;

        let (events, _) = broadcast::channel(event_capacity.max(1));
        let closed = Arc::new(AtomicBool::new(false));
        state.sessions.insert(
            pid,
            Session {
                events: events.clone(),
                closed: Arc::clone(&closed),
                listening: HashSet::new(),
                pending: Vec::new(),
            },
        );
        tracing::trace!(pid, "mock session opened");

        Ok(MockConnection {
            server: self.clone(),
            pid,
            events: Some(events),
            closed,
            transaction: None,
        })
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Fail every statement containing `pattern` from now on.
    pub fn fail_statement(&self, pattern: impl Into<String>, message: impl Into<String>) {
        self.inner.state.lock().failures.push(Failure {
            pattern: pattern.into(),
            message: message.into(),
            remaining: None,
        });
    }

    /// Fail the next `count` statements containing `pattern`.
    pub fn fail_statement_times(
        &self,
        pattern: impl Into<String>,
        message: impl Into<String>,
        count: u32,
    ) {
        self.inner.state.lock().failures.push(Failure {
            pattern: pattern.into(),
            message: message.into(),
            remaining: Some(count),
        });
    }

    /// Remove every injected statement failure.
    pub fn clear_failures(&self) {
        self.inner.state.lock().failures.clear();
    }

    /// Refuse the next `count` connect attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.inner.state.lock().fail_connects = count;
    }

    /// Terminate a session as if the server had crashed it.
    ///
    /// The session reports an error event and every later statement fails.
    pub fn break_connection(&self, pid: i32) {
        let session = self.inner.state.lock().sessions.remove(&pid);
        if let Some(session) = session {
            session.closed.store(true, Ordering::SeqCst);
            let _ = session.events.send(ConnectionEvent::Error(
                "terminating connection due to administrator command".into(),
            ));
            tracing::debug!(pid, "mock session broken");
        }
    }

    // =========================================================================
    // Notifications
    // =========================================================================

    /// Send a notification from outside any client session.
    pub fn notify(&self, channel: &str, payload: &str) {
        let mut state = self.inner.state.lock();
        self.publish(&mut state, 0, channel, payload);
    }

    fn publish(&self, state: &mut ServerState, pid: i32, channel: &str, payload: &str) {
        for session in state.sessions.values_mut() {
            if !session.listening.contains(channel) {
                continue;
            }
            let notification = Notification {
                process_id: pid,
                channel: channel.to_string(),
                payload: payload.to_string(),
            };
            if self.inner.flush_on_traffic {
                session.pending.push(notification);
            } else {
                let _ = session.events.send(ConnectionEvent::Notification(notification));
            }
        }
    }

    fn flush(state: &mut ServerState, pid: i32) {
        if let Some(session) = state.sessions.get_mut(&pid) {
            for notification in session.pending.drain(..) {
                let _ = session.events.send(ConnectionEvent::Notification(notification));
            }
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Number of sessions ever opened.
    #[must_use]
    pub fn connects(&self) -> u64 {
        self.inner.state.lock().connects
    }

    /// Number of sessions closed by their client.
    #[must_use]
    pub fn closes(&self) -> u64 {
        self.inner.state.lock().closes
    }

    /// Process ids of the open sessions, sorted.
    #[must_use]
    pub fn sessions(&self) -> Vec<i32> {
        let mut pids: Vec<i32> = self.inner.state.lock().sessions.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Every statement received, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.inner.state.lock().statements.clone()
    }

    /// Number of received statements starting with `prefix` (case-insensitive).
    #[must_use]
    pub fn count_statements(&self, prefix: &str) -> usize {
        let prefix = prefix.to_lowercase();
        self.inner
            .state
            .lock()
            .statements
            .iter()
            .filter(|s| s.trim_start().to_lowercase().starts_with(&prefix))
            .count()
    }

    /// Number of `LISTEN` commands executed for `channel`.
    #[must_use]
    pub fn listen_count(&self, channel: &str) -> u32 {
        self.inner
            .state
            .lock()
            .listens
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    /// Number of `UNLISTEN` commands executed for `channel`.
    #[must_use]
    pub fn unlisten_count(&self, channel: &str) -> u32 {
        self.inner
            .state
            .lock()
            .unlistens
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    /// Number of open sessions listening on `channel`.
    #[must_use]
    pub fn listeners(&self, channel: &str) -> usize {
        self.inner
            .state
            .lock()
            .sessions
            .values()
            .filter(|s| s.listening.contains(channel))
            .count()
    }

    /// Committed rows of `table`.
    #[must_use]
    pub fn table(&self, table: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn execute(
        &self,
        pid: i32,
        transaction: &mut Option<Transaction>,
        statement: &str,
    ) -> pgmux_client::Result<QueryResult> {
        let mut state = self.inner.state.lock();
        state.statements.push(statement.to_string());

        if !state.sessions.contains_key(&pid) {
            return Err(MockServerError::Closed.into());
        }

        let result = self.run(&mut state, pid, transaction, statement);
        if self.inner.flush_on_traffic {
            Self::flush(&mut state, pid);
        }
        result
    }

    fn run(
        &self,
        state: &mut ServerState,
        pid: i32,
        transaction: &mut Option<Transaction>,
        statement: &str,
    ) -> pgmux_client::Result<QueryResult> {
        if let Some(message) = take_failure(&mut state.failures, statement) {
            tracing::trace!(pid, statement, "injected statement failure");
            return Err(MockServerError::Injected(message).into());
        }

        if let Some(response) = self.inner.responses.get(&normalize(statement)) {
            return response.resolve(statement);
        }

        let command = sql::parse(statement).map_err(MockServerError::Syntax)?;
        match command {
            Command::Begin => {
                if transaction.is_none() {
                    *transaction = Some(Transaction::default());
                }
                Ok(QueryResult::default())
            }
            Command::Commit => {
                if let Some(tx) = transaction.take() {
                    for (table, value) in tx.inserts {
                        state.tables.entry(table).or_default().push(value);
                    }
                    for (channel, payload) in tx.notifies {
                        self.publish(state, pid, &channel, &payload);
                    }
                }
                Ok(QueryResult::default())
            }
            Command::Rollback => {
                *transaction = None;
                Ok(QueryResult::default())
            }
            Command::Savepoint | Command::RollbackToSavepoint | Command::SetTransaction => {
                Ok(QueryResult::default())
            }
            Command::SelectTrue => Ok(single("bool", "t")),
            Command::SelectOne => Ok(single("?column?", "1")),
            Command::SelectLiteral { value, alias } => Ok(single(&alias, &value)),
            Command::SelectAll { table } => {
                let mut rows = state.tables.get(&table).cloned().unwrap_or_default();
                if let Some(tx) = transaction.as_ref() {
                    rows.extend(
                        tx.inserts
                            .iter()
                            .filter(|(t, _)| *t == table)
                            .map(|(_, v)| v.clone()),
                    );
                }
                let count = rows.len() as u64;
                Ok(QueryResult::new(
                    vec!["value".to_string()],
                    rows.into_iter().map(|v| vec![Some(v)]).collect(),
                    count,
                ))
            }
            Command::Insert { table, value } => {
                match transaction.as_mut() {
                    Some(tx) => tx.inserts.push((table, value)),
                    None => state.tables.entry(table).or_default().push(value),
                }
                Ok(QueryResult::affected(1))
            }
            Command::Listen { channel } => {
                *state.listens.entry(channel.clone()).or_default() += 1;
                if let Some(session) = state.sessions.get_mut(&pid) {
                    session.listening.insert(channel);
                }
                Ok(QueryResult::default())
            }
            Command::Unlisten { channel } => {
                let Some(session) = state.sessions.get_mut(&pid) else {
                    return Err(MockServerError::Closed.into());
                };
                let channels: Vec<String> = match channel {
                    Some(channel) => vec![channel],
                    None => session.listening.iter().cloned().collect(),
                };
                for channel in channels {
                    session.listening.remove(&channel);
                    *state.unlistens.entry(channel).or_default() += 1;
                }
                Ok(QueryResult::default())
            }
            Command::Notify { channel, payload } => {
                match transaction.as_mut() {
                    Some(tx) => tx.notifies.push((channel, payload)),
                    None => self.publish(state, pid, &channel, &payload),
                }
                Ok(QueryResult::default())
            }
        }
    }

    fn close_session(&self, pid: i32) {
        let mut state = self.inner.state.lock();
        if state.sessions.remove(&pid).is_some() {
            state.closes += 1;
            tracing::trace!(pid, "mock session closed");
        }
    }
}

impl fmt::Debug for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("MockServer")
            .field("sessions", &state.sessions.len())
            .field("statements", &state.statements.len())
            .field("flush_on_traffic", &self.inner.flush_on_traffic)
            .finish()
    }
}

fn normalize(statement: &str) -> String {
    statement.trim().trim_end_matches(';').trim().to_string()
}

fn single(column: &str, value: &str) -> QueryResult {
    QueryResult::new(
        vec![column.to_string()],
        vec![vec![Some(value.to_string())]],
        1,
    )
}

fn take_failure(failures: &mut Vec<Failure>, statement: &str) -> Option<String> {
    let idx = failures
        .iter()
        .position(|f| statement.contains(&f.pattern))?;
    let failure = &mut failures[idx];
    let message = failure.message.clone();
    let exhausted = match &mut failure.remaining {
        Some(remaining) if *remaining > 1 => {
            *remaining -= 1;
            false
        }
        Some(_) => true,
        None => false,
    };
    if exhausted {
        failures.remove(idx);
    }
    Some(message)
}

#[derive(Debug, Default)]
struct Transaction {
    inserts: Vec<(String, String)>,
    notifies: Vec<(String, String)>,
}

/// Opens sessions on a [`MockServer`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    server: MockServer,
}

impl MockConnector {
    /// Get the server this connector opens sessions on.
    #[must_use]
    pub fn server(&self) -> &MockServer {
        &self.server
    }
}

#[async_trait::async_trait]
impl Connector for MockConnector {
    type Connection = MockConnection;

    async fn connect(&self, config: &Config) -> pgmux_client::Result<MockConnection> {
        Ok(self.server.connect(config.event_capacity)?)
    }
}

/// A session on a [`MockServer`].
pub struct MockConnection {
    server: MockServer,
    pid: i32,
    events: Option<broadcast::Sender<ConnectionEvent>>,
    closed: Arc<AtomicBool>,
    transaction: Option<Transaction>,
}

impl MockConnection {
    /// Backend process id of this session.
    #[must_use]
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Whether a transaction block is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }
}

#[async_trait::async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, statement: &str) -> pgmux_client::Result<QueryResult> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MockServerError::Closed.into());
        }
        // Yield so callers observe a real suspension point.
        tokio::task::yield_now().await;
        self.server
            .execute(self.pid, &mut self.transaction, statement)
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        match &self.events {
            Some(events) => events.subscribe(),
            // A closed session never produces events.
            None => broadcast::channel(1).1,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events = None;
        self.server.close_session(self.pid);
    }
}

impl fmt::Debug for MockConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConnection")
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transaction_visibility() {
        let server = MockServer::builder().build();
        let mut a = server.connect(16).unwrap();
        let mut b = server.connect(16).unwrap();

        a.execute("BEGIN TRANSACTION").await.unwrap();
        a.execute("insert into t values ('v')").await.unwrap();
        assert_eq!(a.execute("select * from t").await.unwrap().len(), 1);
        assert_eq!(b.execute("select * from t").await.unwrap().len(), 0);

        a.execute("COMMIT").await.unwrap();
        assert_eq!(server.table("t"), vec!["v".to_string()]);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let server = MockServer::builder().build();
        let mut conn = server.connect(16).unwrap();

        conn.execute("BEGIN TRANSACTION").await.unwrap();
        conn.execute("insert into t values ('v')").await.unwrap();
        conn.execute("ROLLBACK").await.unwrap();
        assert!(!conn.in_transaction());
        assert!(server.table("t").is_empty());
    }

    #[tokio::test]
    async fn test_notify_reaches_listening_sessions_only() {
        let server = MockServer::builder().build();
        let mut listener = server.connect(16).unwrap();
        let mut other = server.connect(16).unwrap();
        let mut events = listener.events();
        let mut other_events = other.events();

        listener.execute("LISTEN potato").await.unwrap();
        other.execute("notify potato, 'lemon'").await.unwrap();

        match events.try_recv().unwrap() {
            ConnectionEvent::Notification(n) => {
                assert_eq!(n.channel, "potato");
                assert_eq!(n.payload, "lemon");
                assert_eq!(n.process_id, other.pid());
            }
            event => panic!("unexpected event: {event:?}"),
        }
        assert!(other_events.try_recv().is_err());
        assert_eq!(server.listen_count("potato"), 1);
    }

    #[tokio::test]
    async fn test_notify_in_transaction_is_sent_on_commit() {
        let server = MockServer::builder().build();
        let mut listener = server.connect(16).unwrap();
        let mut events = listener.events();
        listener.execute("LISTEN potato").await.unwrap();

        let mut conn = server.connect(16).unwrap();
        conn.execute("BEGIN").await.unwrap();
        conn.execute("select pg_notify('potato', 'x')").await.unwrap();
        assert!(events.try_recv().is_err());
        conn.execute("COMMIT").await.unwrap();
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_flush_on_traffic_holds_notifications() {
        let server = MockServer::builder()
            .flush_notifications_on_traffic(true)
            .build();
        let mut listener = server.connect(16).unwrap();
        let mut events = listener.events();
        listener.execute("LISTEN potato").await.unwrap();

        server.notify("potato", "lemon");
        assert!(events.try_recv().is_err());

        listener.execute("select true").await.unwrap();
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let server = MockServer::builder()
            .fail_statement("ROLLBACK", "rollback exploded")
            .build();
        let mut conn = server.connect(16).unwrap();

        let err = conn.execute("ROLLBACK").await.unwrap_err();
        assert!(err.is_query_error());
        assert_eq!(err.to_string(), "query error: rollback exploded");

        server.clear_failures();
        server.fail_statement_times("select", "once", 1);
        assert!(conn.execute("select 1").await.is_err());
        assert!(conn.execute("select 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_failures_and_breaks() {
        let server = MockServer::builder().fail_next_connects(1).build();
        assert!(matches!(server.connect(16), Err(MockServerError::Refused)));

        let mut conn = server.connect(16).unwrap();
        let mut events = conn.events();
        server.break_connection(conn.pid());

        assert!(conn.is_closed());
        assert!(matches!(events.try_recv().unwrap(), ConnectionEvent::Error(_)));
        assert!(matches!(
            conn.execute("select 1").await,
            Err(pgmux_client::Error::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_syntax_error_is_query_error() {
        let server = MockServer::builder().build();
        let mut conn = server.connect(16).unwrap();
        let err = conn.execute("selec 1").await.unwrap_err();
        assert_eq!(err.code(), Some("42601"));
    }

    #[tokio::test]
    async fn test_canned_response() {
        let server = MockServer::builder()
            .with_response("select 42;", MockResponse::scalar("answer", "42"))
            .build();
        let mut conn = server.connect(16).unwrap();
        let result = conn.execute("select 42").await.unwrap();
        assert_eq!(result.first().and_then(|r| r.get("answer")), Some("42"));
    }
}
