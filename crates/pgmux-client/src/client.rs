//! The pooled client.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use pgmux_pool::{Pool, PoolStatus, StolenConnection};
use tokio::sync::broadcast;

use crate::config::Config;
use crate::connection::{Connector, QueryResult};
use crate::error::{Error, Result};
use crate::events::ClientEvent;
use crate::factory::{ClientConnection, ClientFactory};
use crate::format::Param;
use crate::transaction::{IsolationLevel, TransactionContext};

/// A connection permanently taken out of a client's pool.
pub type StolenClientConnection<K> = StolenConnection<ClientFactory<K>>;

type PooledClientConnection<K> = pgmux_pool::PooledConnection<ClientFactory<K>>;

/// A pooled, transactional client.
///
/// Every operation borrows one connection for its duration and ends the
/// borrow in exactly one terminal state: the connection is released back to
/// the pool when the work succeeded and destroyed when it failed, so a
/// connection left in an unknown state is never handed out again.
///
/// Cloning a `PooledClient` is cheap and yields a handle to the same pool.
///
/// # Example
///
/// ```rust,ignore
/// let client = PooledClient::postgres(Config::from_connection_string(
///     "host=localhost user=app dbname=app",
/// )?)?;
///
/// let result = client.query("select %L as name", &[&"potato"]).await?;
/// assert_eq!(result.first().and_then(|r| r.get("name")), Some("potato"));
///
/// client
///     .transaction(|mut tx| Box::pin(async move {
///         tx.query("insert into fruit values (%L)", &[&"lemon"]).await?;
///         Ok::<_, Error>(())
///     }))
///     .await?;
///
/// client.close().await;
/// ```
pub struct PooledClient<K: Connector> {
    pool: Pool<ClientFactory<K>>,
    events: broadcast::Sender<ClientEvent>,
    config: Arc<Config>,
}

impl<K: Connector> Clone for PooledClient<K> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            events: self.events.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<K: Connector> PooledClient<K> {
    /// Create a client. No connection is opened until the first operation.
    pub fn new(connector: K, mut config: Config) -> Result<Self> {
        config.validate()?;
        if config.pool.name.is_none() {
            config.pool.name = Some(config.pool_name());
        }

        let config = Arc::new(config);
        let (events, _) = broadcast::channel(config.event_capacity);
        let factory = ClientFactory::new(connector, Arc::clone(&config), events.clone());
        let pool = Pool::new(factory, config.pool.clone())?;

        tracing::info!(
            pool = %config.pool_name(),
            host = %config.host,
            port = config.port,
            max_connections = config.pool.max_connections,
            "pooled client created"
        );

        Ok(Self {
            pool,
            events,
            config,
        })
    }

    /// Render and run a single statement on a pooled connection.
    ///
    /// The template is rendered before a connection is borrowed, so a
    /// formatting error never touches the pool.
    pub async fn query(&self, template: &str, params: &[Param<'_>]) -> Result<QueryResult> {
        let statement = self.config.format.render(template, params)?;
        let mut conn = self.acquire().await?;

        match conn.execute(&statement).await {
            Ok(result) => {
                conn.release().await;
                Ok(result)
            }
            Err(e) => {
                conn.destroy().await;
                Err(e)
            }
        }
    }

    /// Run `f` inside a transaction at the server's default isolation level.
    ///
    /// `BEGIN` is issued before `f` runs. If `f` returns `Ok`, the
    /// transaction is committed and the connection released. If it returns
    /// `Err`, the transaction is rolled back, the connection destroyed, and
    /// the error returned unchanged. A failing `ROLLBACK` does not replace
    /// that error; it is published as [`ClientEvent::RollbackFailed`].
    ///
    /// If `f` returns `Ok` after a statement inside it failed (and was not
    /// recovered with [`TransactionContext::rollback_to`]), nothing is
    /// committed: the transaction is rolled back and
    /// [`Error::TransactionAborted`] returned.
    pub async fn transaction<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(TransactionContext<'c, K::Connection>) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<Error>,
    {
        self.run_transaction("BEGIN TRANSACTION".to_string(), f).await
    }

    /// Run `f` inside a transaction at the given isolation level.
    ///
    /// See [`transaction`](Self::transaction) for the commit and rollback
    /// rules.
    pub async fn transaction_with_isolation<T, E, F>(
        &self,
        level: IsolationLevel,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(TransactionContext<'c, K::Connection>) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<Error>,
    {
        self.run_transaction(level.begin_sql(), f).await
    }

    /// Borrow a connection for the duration of `f`.
    ///
    /// The connection is released if `f` returns `Ok` and destroyed if it
    /// returns `Err`. A connection on which a statement failed is destroyed
    /// either way.
    pub async fn with_connection<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(&'c mut ClientConnection<K::Connection>) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<Error>,
    {
        let mut conn = self.acquire().await?;
        let outcome = f(&mut *conn).await;

        match outcome {
            Ok(value) => {
                conn.release().await;
                Ok(value)
            }
            Err(e) => {
                conn.destroy().await;
                Err(e)
            }
        }
    }

    /// Take a connection out of the pool for exclusive long-term use.
    ///
    /// The connection keeps counting against the pool size. Call
    /// [`StolenConnection::close`] to destroy it and free its slot.
    pub async fn steal(&self) -> Result<StolenClientConnection<K>> {
        let conn = self.pool.steal().await?;
        tracing::debug!(connection_id = conn.id(), "connection stolen from client pool");
        Ok(conn)
    }

    /// Close the client.
    ///
    /// Waits for in-flight operations to finish, then tears down every idle
    /// connection. Later operations fail with [`Error::PoolClosed`].
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Subscribe to client events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Get the pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Get the client configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Check if the client has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    async fn acquire(&self) -> Result<PooledClientConnection<K>> {
        Ok(self.pool.get().await?)
    }

    async fn run_transaction<T, E, F>(&self, begin: String, f: F) -> std::result::Result<T, E>
    where
        F: for<'c> FnOnce(TransactionContext<'c, K::Connection>) -> BoxFuture<'c, std::result::Result<T, E>>,
        E: From<Error>,
    {
        let mut conn = self.acquire().await?;

        if let Err(e) = conn.execute(&begin).await {
            conn.destroy().await;
            return Err(e.into());
        }

        let mut outcome = f(TransactionContext::new(&mut *conn)).await;
        if outcome.is_ok() && conn.has_failed() {
            tracing::warn!(
                connection_id = conn.id(),
                "statement failed inside a transaction that returned Ok, rolling back"
            );
            outcome = Err(Error::TransactionAborted.into());
        }

        match outcome {
            Ok(value) => match conn.execute("COMMIT").await {
                Ok(_) => {
                    conn.release().await;
                    Ok(value)
                }
                Err(e) => {
                    tracing::warn!(connection_id = conn.id(), error = %e, "commit failed");
                    conn.destroy().await;
                    Err(e.into())
                }
            },
            Err(e) => {
                if let Err(rollback) = conn.execute("ROLLBACK").await {
                    tracing::error!(
                        connection_id = conn.id(),
                        error = %rollback,
                        "rollback failed after transaction error"
                    );
                    let _ = self.events.send(ClientEvent::RollbackFailed {
                        message: rollback.to_string(),
                    });
                }
                conn.destroy().await;
                Err(e)
            }
        }
    }
}

#[cfg(feature = "postgres")]
impl PooledClient<crate::postgres::PgConnector> {
    /// Create a client backed by PostgreSQL over `tokio-postgres`.
    pub fn postgres(config: Config) -> Result<Self> {
        Self::new(crate::postgres::PgConnector::new(), config)
    }
}

impl<K: Connector> std::fmt::Debug for PooledClient<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("config", &self.config)
            .field("status", &self.pool.status())
            .finish()
    }
}
