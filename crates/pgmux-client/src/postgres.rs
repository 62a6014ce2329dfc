//! PostgreSQL backend over `tokio-postgres`.
//!
//! Statements run through the simple query protocol, so a statement string
//! may hold several commands and every value comes back in text format.
//! The driver half of each connection runs on its own task and republishes
//! notices, notifications and fatal errors as [`ConnectionEvent`]s.

use std::future::poll_fn;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_postgres::{AsyncMessage, NoTls, SimpleQueryMessage};

use crate::config::Config;
use crate::connection::{Connection, ConnectionEvent, Connector, Notice, Notification, QueryResult};
use crate::error::{Error, Result};

/// Opens PostgreSQL connections without TLS.
#[derive(Debug, Clone, Default)]
pub struct PgConnector {
    _private: (),
}

impl PgConnector {
    /// Create a new connector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Connector for PgConnector {
    type Connection = PgConnection;

    async fn connect(&self, config: &Config) -> Result<PgConnection> {
        let (client, mut connection) =
            tokio_postgres::connect(&config.to_connection_string(), NoTls)
                .await
                .map_err(|e| Error::Connect(e.to_string()))?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let tx = events.clone();

        let driver = tokio::spawn(async move {
            loop {
                match poll_fn(|cx| connection.poll_message(cx)).await {
                    Some(Ok(AsyncMessage::Notification(n))) => {
                        tracing::trace!(channel = n.channel(), "notification received");
                        let _ = tx.send(ConnectionEvent::Notification(Notification {
                            process_id: n.process_id(),
                            channel: n.channel().to_string(),
                            payload: n.payload().to_string(),
                        }));
                    }
                    Some(Ok(AsyncMessage::Notice(notice))) => {
                        let _ = tx.send(ConnectionEvent::Notice(Notice {
                            severity: notice.severity().to_string(),
                            code: notice.code().code().to_string(),
                            message: notice.message().to_string(),
                        }));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "postgres connection failed");
                        let _ = tx.send(ConnectionEvent::Error(e.to_string()));
                        break;
                    }
                    None => break,
                }
            }
            tracing::trace!("postgres connection driver finished");
        });

        Ok(PgConnection {
            client: Some(client),
            events,
            driver,
        })
    }
}

/// A PostgreSQL session.
pub struct PgConnection {
    client: Option<tokio_postgres::Client>,
    events: broadcast::Sender<ConnectionEvent>,
    driver: JoinHandle<()>,
}

#[async_trait::async_trait]
impl Connection for PgConnection {
    async fn execute(&mut self, statement: &str) -> Result<QueryResult> {
        let client = self.client.as_ref().ok_or(Error::ConnectionClosed)?;
        let messages = client.simple_query(statement).await.map_err(map_error)?;

        let mut result = QueryResult::default();
        let mut columns = Vec::new();
        let mut rows = Vec::new();

        for message in messages {
            match message {
                SimpleQueryMessage::Row(row) => {
                    if columns.is_empty() {
                        columns = row.columns().iter().map(|c| c.name().to_string()).collect();
                    }
                    rows.push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
                }
                SimpleQueryMessage::CommandComplete(affected) => {
                    if !rows.is_empty() {
                        result = QueryResult::new(
                            std::mem::take(&mut columns),
                            std::mem::take(&mut rows),
                            affected,
                        );
                    } else if result.is_empty() {
                        result = QueryResult::affected(affected);
                    }
                }
                _ => {}
            }
        }

        Ok(result)
    }

    fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.client.as_ref().is_none_or(tokio_postgres::Client::is_closed)
    }

    async fn close(&mut self) {
        // Dropping the client ends the session; the driver then drains and exits.
        if self.client.take().is_some() {
            let _ = (&mut self.driver).await;
        }
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn map_error(e: tokio_postgres::Error) -> Error {
    if let Some(db) = e.as_db_error() {
        return Error::Query {
            message: db.message().to_string(),
            code: Some(db.code().code().to_string()),
        };
    }
    if e.is_closed() {
        return Error::ConnectionClosed;
    }
    Error::Protocol(e.to_string())
}
