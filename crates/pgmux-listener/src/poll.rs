//! Keep-alive polling.
//!
//! Some servers only flush queued notifications to a session when it sends
//! traffic. The poll loop runs a trivial query on the listening connection at
//! a fixed interval so delivery latency stays bounded.

use std::time::Duration;

use pgmux_client::Connector;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{ListenerError, ListenerEventError, Result};
use crate::events::ListenerEvent;
use crate::listener::SharedConnection;

/// Statement sent on every poll.
pub const KEEP_ALIVE_QUERY: &str = "select true;";

/// A running poll loop.
pub(crate) struct Poller {
    token: CancellationToken,
}

impl Poller {
    /// Start polling every `interval`. The first poll happens one interval
    /// from now.
    pub(crate) fn spawn<K: Connector>(
        conn: SharedConnection<K>,
        interval: Duration,
        events: broadcast::Sender<ListenerEvent>,
    ) -> Self {
        let token = CancellationToken::new();
        tokio::spawn(run(conn, interval, events, token.clone()));
        Self { token }
    }

    /// Stop scheduling polls. A poll already running completes.
    pub(crate) fn stop(&self) {
        self.token.cancel();
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }
}

/// Run one keep-alive query.
pub(crate) async fn poll_once<K: Connector>(conn: &SharedConnection<K>) -> Result<()> {
    let mut guard = conn.lock().await;
    let conn = guard.as_mut().ok_or(ListenerError::Closed)?;
    conn.execute(KEEP_ALIVE_QUERY).await?;
    Ok(())
}

async fn run<K: Connector>(
    conn: SharedConnection<K>,
    interval: Duration,
    events: broadcast::Sender<ListenerEvent>,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    tracing::debug!(interval_ms = interval.as_millis() as u64, "keep-alive polling started");

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = poll_once(&conn).await {
            if token.is_cancelled() {
                break;
            }
            token.cancel();
            tracing::warn!(error = %e, "keep-alive poll failed, polling stopped");
            let _ = events.send(ListenerEvent::Error(ListenerEventError::PollFailed(
                e.to_string(),
            )));
            break;
        }
        tracing::trace!("keep-alive poll");
    }

    tracing::debug!("keep-alive polling stopped");
}
