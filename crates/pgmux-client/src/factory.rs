//! Pool integration: the connection factory and the pooled connection type.

use std::sync::Arc;

use pgmux_pool::ConnectionFactory;
use tokio::sync::broadcast;

use crate::config::Config;
use crate::connection::{Connection, ConnectionEvent, Connector, QueryResult};
use crate::error::{Error, Result};
use crate::events::ClientEvent;
use crate::format::Param;

/// Creates, probes and tears down [`ClientConnection`]s for the pool.
pub struct ClientFactory<K: Connector> {
    connector: K,
    config: Arc<Config>,
    events: broadcast::Sender<ClientEvent>,
}

impl<K: Connector> ClientFactory<K> {
    pub(crate) fn new(
        connector: K,
        config: Arc<Config>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            connector,
            config,
            events,
        }
    }

    /// Get the underlying connector.
    #[must_use]
    pub fn connector(&self) -> &K {
        &self.connector
    }
}

#[async_trait::async_trait]
impl<K: Connector> ConnectionFactory for ClientFactory<K> {
    type Connection = ClientConnection<K::Connection>;
    type Error = Error;

    async fn create(&self) -> Result<Self::Connection> {
        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            "opening backend connection"
        );
        let conn = self.connector.connect(&self.config).await?;
        tokio::spawn(forward_events(conn.events(), self.events.clone()));
        Ok(ClientConnection {
            conn,
            config: Arc::clone(&self.config),
            events: self.events.clone(),
            failed: false,
        })
    }

    async fn validate(&self, conn: &mut Self::Connection) -> bool {
        match conn.conn.execute(&self.config.health_check_query).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!(error = %e, "health check failed");
                false
            }
        }
    }

    async fn destroy(&self, mut conn: Self::Connection) {
        conn.conn.close().await;
    }

    fn is_valid(&self, conn: &Self::Connection) -> bool {
        !conn.failed && !conn.conn.is_closed()
    }
}

/// Republish a pooled connection's asynchronous events on the client channel.
///
/// Notifications are not forwarded: only a stolen connection listens.
async fn forward_events(
    mut rx: broadcast::Receiver<ConnectionEvent>,
    tx: broadcast::Sender<ClientEvent>,
) {
    loop {
        match rx.recv().await {
            Ok(ConnectionEvent::Error(message)) => {
                tracing::warn!(error = %message, "pooled connection reported an error");
                let _ = tx.send(ClientEvent::ConnectionError { message });
            }
            Ok(ConnectionEvent::Notice(notice)) => {
                tracing::debug!(
                    severity = %notice.severity,
                    code = %notice.code,
                    message = %notice.message,
                    "server notice"
                );
                let _ = tx.send(ClientEvent::Notice(notice));
            }
            Ok(ConnectionEvent::Notification(_)) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "connection event stream lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// A backend connection managed by a [`PooledClient`](crate::PooledClient).
///
/// Statements run through [`query`](Self::query) are rendered with the
/// client's formatter; failures are published as
/// [`ClientEvent::QueryError`] before being returned.
///
/// A connection on which any statement failed is never returned to idle,
/// even when the caller handled the error.
pub struct ClientConnection<C> {
    conn: C,
    config: Arc<Config>,
    events: broadcast::Sender<ClientEvent>,
    failed: bool,
}

impl<C: Connection> ClientConnection<C> {
    /// Render a statement template and execute it.
    pub async fn query(&mut self, template: &str, params: &[Param<'_>]) -> Result<QueryResult> {
        let statement = self.config.format.render(template, params)?;
        self.execute(&statement).await
    }

    /// Execute a rendered statement as-is.
    pub async fn execute(&mut self, statement: &str) -> Result<QueryResult> {
        tracing::debug!(statement = %statement, "executing statement");
        match self.conn.execute(statement).await {
            Ok(result) => Ok(result),
            Err(e) => {
                self.failed = true;
                tracing::debug!(statement = %statement, error = %e, "statement failed");
                let _ = self.events.send(ClientEvent::QueryError {
                    statement: statement.to_string(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Subscribe to the backend connection's raw events.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.conn.events()
    }

    /// Whether a statement has failed on this connection since it was opened
    /// or since the last savepoint recovery.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    pub(crate) fn clear_failure(&mut self) {
        self.failed = false;
    }

    /// Whether the backend session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }

    /// Get a reference to the backend connection.
    pub fn get_ref(&self) -> &C {
        &self.conn
    }

    /// Get a mutable reference to the backend connection.
    pub fn get_mut(&mut self) -> &mut C {
        &mut self.conn
    }
}

impl<C> std::fmt::Debug for ClientConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}
