//! # pgmux-listener
//!
//! Publish/subscribe over PostgreSQL `LISTEN`/`NOTIFY`.
//!
//! A [`Listener`] steals one connection from a
//! [`PooledClient`](pgmux_client::PooledClient) and multiplexes it between
//! any number of in-process subscribers:
//!
//! - one `LISTEN` per topic no matter how many callbacks subscribe, and one
//!   `UNLISTEN` when the last one leaves
//! - JSON payload decoding (or raw text), with undecodable payloads reported
//!   on the event channel instead of delivered
//! - deferred delivery on a dedicated task, isolating subscribers from each
//!   other's panics
//! - optional keep-alive polling for servers that only flush notifications
//!   when the session sees traffic
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//!
//! use pgmux_client::{Config, PooledClient};
//! use pgmux_listener::{Listener, ListenerConfig};
//!
//! let client = PooledClient::postgres(Config::from_connection_string("host=localhost")?)?;
//! let listener = Listener::new(
//!     &client,
//!     ListenerConfig::new().poll_interval(Duration::from_millis(250)),
//! )?;
//!
//! let callback = listener
//!     .subscribe_fn("potato", |n| println!("{}: {:?}", n.channel, n.payload))
//!     .await?;
//! client.query("notify potato, %L", &[&r#"{"name":"lemon"}"#]).await?;
//!
//! listener.unsubscribe("potato", &callback).await?;
//! listener.close().await;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
mod dispatch;
pub mod error;
pub mod events;
mod listener;
pub mod notification;
mod poll;
pub mod subscription;

pub use config::{ListenerConfig, PayloadFormat};
pub use error::{ListenerError, ListenerEventError, Result};
pub use events::{ListenerEvent, TopicEvents};
pub use listener::Listener;
pub use notification::{Notification, Payload};
pub use poll::KEEP_ALIVE_QUERY;
pub use subscription::Callback;
