//! # pgmux-testing
//!
//! Test infrastructure for the pgmux crates.
//!
//! This crate provides an in-memory mock backend implementing the client's
//! connection contract, plus helpers for tests against a real server. The
//! cross-crate integration tests live in its `tests/` directory.
//!
//! ## Features
//!
//! - Transactions with deferred writes and deferred `NOTIFY`
//! - `LISTEN`/`NOTIFY` across sessions, optionally flushed only on traffic
//! - Statement log and `LISTEN`/`UNLISTEN` counters
//! - Failure injection per statement, per connect, or by breaking a session
//!
//! ## Example
//!
//! ```rust,ignore
//! use pgmux_client::{Config, PooledClient};
//! use pgmux_testing::MockServer;
//!
//! #[tokio::test]
//! async fn test_with_mock_server() {
//!     let server = MockServer::builder().build();
//!     let client = PooledClient::new(server.connector(), Config::new()).unwrap();
//!
//!     client.query("insert into t values (%L)", &[&"v"]).await.unwrap();
//!     assert_eq!(server.table("t"), vec!["v"]);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock_server;
mod sql;

pub use mock_server::{
    MockConnection, MockConnector, MockResponse, MockServer, MockServerBuilder, MockServerConfig,
    MockServerError,
};
