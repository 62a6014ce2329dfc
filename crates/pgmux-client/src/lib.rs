//! # pgmux-client
//!
//! Pooled, transactional PostgreSQL client.
//!
//! The client keeps a bounded set of long-lived backend connections and
//! lends one out per operation. The borrowing discipline is strict: work
//! that succeeded returns its connection to the pool, work that failed
//! destroys it, so a session in an unknown state is never reused.
//!
//! ## Features
//!
//! - **Single statements**: [`PooledClient::query`] with `%s`/`%I`/`%L`
//!   template formatting
//! - **Transactions**: closure-scoped `BEGIN`/`COMMIT`/`ROLLBACK` with
//!   isolation levels and savepoints
//! - **Borrowing**: [`PooledClient::with_connection`] for several statements
//!   on one connection
//! - **Stealing**: [`PooledClient::steal`] for exclusive long-term use, e.g.
//!   `LISTEN`
//! - **Events**: query errors, connection errors, server notices and
//!   rollback failures on a broadcast channel
//!
//! The backend is reached through the [`Connector`]/[`Connection`] traits.
//! The `postgres` feature (on by default) provides an implementation on top
//! of `tokio-postgres`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgmux_client::{Config, Error, PooledClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let config = Config::from_connection_string(
//!         "host=localhost user=app password=secret dbname=app",
//!     )?
//!     .max_connections(10)
//!     .validate_connections(true);
//!
//!     let client = PooledClient::postgres(config)?;
//!
//!     let result = client.query("select true as ok", &[]).await?;
//!     assert!(result.first().map(|r| r.get_bool("ok")).transpose()?.unwrap_or(false));
//!
//!     client
//!         .transaction(|mut tx| Box::pin(async move {
//!             tx.query("insert into %I values (%L)", &[&"fruit", &"lemon"]).await?;
//!             Ok::<_, Error>(())
//!         }))
//!         .await?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod factory;
pub mod format;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod transaction;

pub use client::{PooledClient, StolenClientConnection};
pub use config::{Config, StatementFormat};
pub use connection::{Connection, ConnectionEvent, Connector, Notice, Notification, QueryResult, Row};
pub use error::{Error, Result};
pub use events::ClientEvent;
pub use factory::{ClientConnection, ClientFactory};
pub use format::{Formatter, Param};
pub use transaction::{IsolationLevel, SavePoint, TransactionContext};

#[cfg(feature = "postgres")]
pub use postgres::{PgConnection, PgConnector};

// Re-export pool types callers interact with
pub use pgmux_pool::{PoolConfig, PoolStatus};
