//! Connection lifecycle management.
//!
//! This module defines the factory trait the pool calls to create, probe and
//! tear down connections, and the metadata the pool tracks for each one.

use std::time::Instant;

/// Factory for the connections held by a [`Pool`](crate::Pool).
///
/// The pool never inspects connections itself; every lifecycle decision goes
/// through this trait. `#[async_trait]` keeps the returned futures `Send` so
/// the pool can tear connections down from spawned tasks.
#[async_trait::async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type managed by the pool.
    type Connection: Send + 'static;

    /// Error returned when a connection cannot be created.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open a new connection.
    async fn create(&self) -> Result<Self::Connection, Self::Error>;

    /// Probe a connection for liveness before it is handed out.
    ///
    /// Only called when checkout validation is enabled. Returning `false`
    /// destroys the connection.
    async fn validate(&self, _conn: &mut Self::Connection) -> bool {
        true
    }

    /// Tear down a connection that will never be used again.
    async fn destroy(&self, conn: Self::Connection);

    /// Cheap synchronous check that the connection is still usable.
    ///
    /// Typically reports whether the underlying session has been closed by
    /// the server or by an asynchronous error. Invalid connections are
    /// discarded on checkout and on release.
    fn is_valid(&self, _conn: &Self::Connection) -> bool {
        true
    }
}

/// Where a pooled connection currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting in the idle queue.
    Idle,
    /// Borrowed through a [`PooledConnection`](crate::PooledConnection).
    InUse,
    /// Taken from the idle queue and being probed.
    Checking,
    /// Handed out as a [`StolenConnection`](crate::StolenConnection); never returns.
    Stolen,
}

/// Bookkeeping the pool keeps next to each connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Identifier, unique within the pool.
    pub id: u64,
    /// When the connection was opened.
    pub created_at: Instant,
    /// Last checkout or checkin.
    pub last_used_at: Instant,
    /// Last successful checkout probe.
    pub last_checked_at: Option<Instant>,
    /// Number of checkouts so far.
    pub checkout_count: u64,
    /// Current state.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    pub(crate) fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_used_at: now,
            last_checked_at: None,
            checkout_count: 0,
            state: ConnectionState::Idle,
        }
    }

    pub(crate) fn mark_checkout(&mut self) {
        self.checkout_count += 1;
        self.touch(ConnectionState::InUse);
    }

    pub(crate) fn mark_checkin(&mut self) {
        self.touch(ConnectionState::Idle);
    }

    pub(crate) fn mark_checked(&mut self) {
        self.last_checked_at = Some(Instant::now());
    }

    pub(crate) fn mark_stolen(&mut self) {
        self.state = ConnectionState::Stolen;
    }

    fn touch(&mut self, state: ConnectionState) {
        self.last_used_at = Instant::now();
        self.state = state;
    }
}
