//! # pgmux-pool
//!
//! Bounded async connection pool with lifecycle management.
//!
//! The pool is driver agnostic: connections are created, probed and torn down
//! through a [`ConnectionFactory`]. It guarantees that a connection is owned by
//! exactly one party at a time (the idle set, one borrower, or the holder of a
//! stolen connection) and that the total never exceeds the configured size.
//!
//! ## Features
//!
//! - FIFO waiting when all connections are in use (no acquisition timeout)
//! - Optional validation of idle connections on checkout
//! - Explicit `release`/`destroy` so a connection that failed mid-use is never
//!   reused
//! - Stealing a connection for exclusive long-term use
//! - Draining on close
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgmux_pool::{Pool, PoolConfig};
//!
//! let pool = Pool::new(factory, PoolConfig::new().max_connections(10))?;
//!
//! let mut conn = pool.get().await?;
//! match conn.run("select true;").await {
//!     Ok(_) => conn.release().await,
//!     Err(_) => conn.destroy().await,
//! }
//!
//! pool.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

pub use config::{DEFAULT_POOL_NAME, PoolConfig};
pub use error::PoolError;
pub use lifecycle::{ConnectionFactory, ConnectionMetadata, ConnectionState};
pub use pool::{Pool, PoolStatus, PooledConnection, StolenConnection};
