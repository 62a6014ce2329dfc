//! The notification listener.

use std::sync::Arc;
use std::time::Duration;

use pgmux_client::format::quote_ident;
use pgmux_client::{Connector, PooledClient, StolenClientConnection};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ListenerConfig;
use crate::dispatch;
use crate::error::{ListenerError, Result};
use crate::events::{ListenerEvent, TopicEvents};
use crate::notification::Notification;
use crate::poll::{self, Poller};
use crate::subscription::{Callback, Removal, SubscriptionTable};

/// The listening connection, shared with the poll loop.
///
/// Every backend command goes through this lock, so `LISTEN`, `UNLISTEN`
/// and keep-alive polls never interleave. `None` once the listener closed.
pub(crate) type SharedConnection<K> = Arc<tokio::sync::Mutex<Option<StolenClientConnection<K>>>>;

enum State {
    Uninitialized,
    Initialized(Session),
    Closed,
}

/// Dispatch tasks started by `init`.
struct Session {
    shutdown: CancellationToken,
    dispatcher: JoinHandle<()>,
    delivery: JoinHandle<()>,
}

/// Multiplexes `LISTEN`/`NOTIFY` over one connection stolen from a
/// [`PooledClient`].
///
/// Any number of callbacks can subscribe to a topic. The backend sees one
/// `LISTEN` when a topic gains its first subscriber and one `UNLISTEN` when
/// it loses its last. Notifications are decoded once and delivered to every
/// callback of the topic on a dedicated task.
///
/// # Example
///
/// ```rust,ignore
/// let listener = Listener::new(&client, ListenerConfig::new())?;
///
/// let callback = listener
///     .subscribe_fn("potato", |n| println!("{:?}", n.payload))
///     .await?;
///
/// client.query("notify potato, %L", &[&r#"{"ripe":true}"#]).await?;
///
/// listener.unsubscribe("potato", &callback).await?;
/// listener.close().await;
/// ```
pub struct Listener<K: Connector> {
    client: PooledClient<K>,
    config: ListenerConfig,
    events: broadcast::Sender<ListenerEvent>,
    table: Arc<parking_lot::Mutex<SubscriptionTable>>,
    conn: SharedConnection<K>,
    state: tokio::sync::Mutex<State>,
    poller: parking_lot::Mutex<Option<Poller>>,
}

impl<K: Connector> Listener<K> {
    /// Create a listener on top of `client`.
    ///
    /// No connection is taken until the first operation (or [`init`](Self::init)).
    pub fn new(client: &PooledClient<K>, config: ListenerConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            client: client.clone(),
            config,
            events,
            table: Arc::new(parking_lot::Mutex::new(SubscriptionTable::default())),
            conn: Arc::new(tokio::sync::Mutex::new(None)),
            state: tokio::sync::Mutex::new(State::Uninitialized),
            poller: parking_lot::Mutex::new(None),
        })
    }

    /// Steal the listening connection and start dispatching.
    ///
    /// Idempotent. Starts polling when the configured poll interval is
    /// non-zero; if that first poll fails, the connection is given back
    /// (destroyed), the listener stays uninitialized and the next call
    /// starts over. Every other operation calls this first.
    pub async fn init(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match &*state {
            State::Initialized(_) => return Ok(()),
            State::Closed => return Err(ListenerError::Closed),
            State::Uninitialized => {}
        }

        let conn = self.client.steal().await?;
        let connection_id = conn.id();
        let source = conn.events();
        *self.conn.lock().await = Some(conn);

        let shutdown = CancellationToken::new();
        let tasks = dispatch::spawn(
            source,
            Arc::clone(&self.table),
            self.events.clone(),
            self.config.payload,
            shutdown.clone(),
        );
        let session = Session {
            shutdown,
            dispatcher: tasks.dispatcher,
            delivery: tasks.delivery,
        };

        if !self.config.poll_interval.is_zero() {
            if let Err(e) = self.start_polling(self.config.poll_interval).await {
                tracing::warn!(connection_id, error = %e, "initial poll failed, destroying listener connection");
                self.teardown(session).await;
                return Err(e);
            }
        }

        *state = State::Initialized(session);
        tracing::info!(connection_id, "listener initialized");
        Ok(())
    }

    /// Register `callback` for `topic`.
    ///
    /// Issues `LISTEN` when `topic` has no other subscribers. If that fails
    /// the registration is undone and the error returned. Subscribing the
    /// same callback twice has no effect.
    pub async fn subscribe(&self, topic: &str, callback: Callback) -> Result<()> {
        if topic.is_empty() {
            return Err(ListenerError::State("topic must not be empty".into()));
        }
        self.init().await?;

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ListenerError::Closed)?;

        let is_new = self.table.lock().insert(topic, callback);
        if is_new {
            let statement = format!("LISTEN {}", quote_ident(topic));
            if let Err(e) = conn.execute(&statement).await {
                self.table.lock().remove_topic(topic);
                return Err(e.into());
            }
            tracing::debug!(channel = topic, "listening");
        }
        Ok(())
    }

    /// Register a closure for `topic`, returning its handle for
    /// [`unsubscribe`](Self::unsubscribe).
    pub async fn subscribe_fn<F>(&self, topic: &str, f: F) -> Result<Callback>
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let callback = Callback::new(f);
        self.subscribe(topic, callback.clone()).await?;
        Ok(callback)
    }

    /// Remove `callback` from `topic`.
    ///
    /// Issues `UNLISTEN` when it was the topic's last subscriber; if that
    /// fails the callback stays registered and the error is returned.
    /// Removing a callback that is not registered succeeds without effect.
    pub async fn unsubscribe(&self, topic: &str, callback: &Callback) -> Result<()> {
        self.init().await?;

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ListenerError::Closed)?;

        let removal = self.table.lock().remove(topic, callback);
        if removal == Removal::TopicEmptied {
            let statement = format!("UNLISTEN {}", quote_ident(topic));
            if let Err(e) = conn.execute(&statement).await {
                // Still listening on the backend, so the entry stays.
                self.table.lock().insert(topic, callback.clone());
                return Err(e.into());
            }
            tracing::debug!(channel = topic, "stopped listening");
        }
        Ok(())
    }

    /// Remove every subscription and `UNLISTEN` every topic.
    ///
    /// The table is cleared before any command is sent. All topics are
    /// attempted; the first failure is returned.
    pub async fn reset(&self) -> Result<()> {
        self.init().await?;

        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(ListenerError::Closed)?;

        let topics = self.table.lock().clear();
        let mut first_error = None;
        for topic in &topics {
            if let Err(e) = conn.execute(&format!("UNLISTEN {}", quote_ident(topic))).await {
                tracing::warn!(channel = %topic, error = %e, "UNLISTEN failed during reset");
                first_error.get_or_insert(e);
            }
        }

        tracing::debug!(topics = topics.len(), "listener reset");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Start (or restart) keep-alive polling.
    ///
    /// Runs one poll immediately and returns its error, if any. Then polls
    /// every `interval`, or the configured interval when `None`. A running
    /// loop is replaced.
    pub async fn poll_start(&self, interval: Option<Duration>) -> Result<()> {
        let interval = interval.unwrap_or(self.config.poll_interval);
        if interval.is_zero() {
            return Err(ListenerError::State(
                "poll interval must be greater than zero".into(),
            ));
        }
        self.init().await?;
        self.start_polling(interval).await
    }

    /// Stop keep-alive polling. A poll already in flight completes.
    pub fn poll_stop(&self) {
        if let Some(poller) = self.poller.lock().take() {
            poller.stop();
            tracing::debug!("keep-alive polling stop requested");
        }
    }

    /// Check if keep-alive polling is running.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .as_ref()
            .is_some_and(Poller::is_running)
    }

    /// Topics currently listened on, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.table.lock().topics()
    }

    /// Subscribe to listener events.
    pub fn events(&self) -> broadcast::Receiver<ListenerEvent> {
        self.events.subscribe()
    }

    /// Follow notifications on one topic.
    ///
    /// Does not subscribe to `topic`; pair it with
    /// [`subscribe`](Self::subscribe).
    pub fn events_for(&self, topic: &str) -> TopicEvents {
        TopicEvents::new(topic, self.events.subscribe())
    }

    /// Close the listener.
    ///
    /// Stops polling and dispatching, destroys the listening connection
    /// (freeing its pool slot) and drops every subscription. Later
    /// operations fail with [`ListenerError::Closed`]. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        let previous = std::mem::replace(&mut *state, State::Closed);

        self.poll_stop();

        if let State::Initialized(session) = previous {
            self.teardown(session).await;
            tracing::info!("listener closed");
        }

        self.table.lock().clear();
    }

    /// Check if the listener has been closed.
    pub async fn is_closed(&self) -> bool {
        matches!(*self.state.lock().await, State::Closed)
    }

    /// Stop dispatching and destroy the listening connection.
    async fn teardown(&self, session: Session) {
        session.shutdown.cancel();
        if let Some(conn) = self.conn.lock().await.take() {
            conn.close().await;
        }
        // Deliveries queued before shutdown still run.
        let _ = session.dispatcher.await;
        let _ = session.delivery.await;
    }

    async fn start_polling(&self, interval: Duration) -> Result<()> {
        self.poll_stop();
        poll::poll_once(&self.conn).await?;

        let poller = Poller::spawn(Arc::clone(&self.conn), interval, self.events.clone());
        if let Some(previous) = self.poller.lock().replace(poller) {
            previous.stop();
        }
        Ok(())
    }
}

impl<K: Connector> Drop for Listener<K> {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.get_mut().take() {
            poller.stop();
        }
        if let State::Initialized(session) = self.state.get_mut() {
            session.shutdown.cancel();
        }
    }
}

impl<K: Connector> std::fmt::Debug for Listener<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("config", &self.config)
            .field("topics", &self.topics())
            .field("polling", &self.is_polling())
            .finish()
    }
}
