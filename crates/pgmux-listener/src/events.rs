//! Listener events.

use pgmux_client::Notice;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::ListenerEventError;
use crate::notification::Notification;

/// An event published on [`Listener::events`](crate::Listener::events).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ListenerEvent {
    /// A notification on a subscribed topic was decoded and queued for
    /// delivery.
    Notification(Notification),
    /// A server notice raised on the listening connection.
    Notice(Notice),
    /// An asynchronous failure.
    Error(ListenerEventError),
}

impl ListenerEvent {
    /// Get the error, if this is an error event.
    #[must_use]
    pub fn as_error(&self) -> Option<&ListenerEventError> {
        match self {
            Self::Error(e) => Some(e),
            _ => None,
        }
    }
}

/// Notifications for a single topic, filtered from the listener's event
/// channel.
///
/// Created by [`Listener::events_for`](crate::Listener::events_for). Only
/// sees notifications that were decoded and delivered; the topic must still
/// be subscribed for any to arrive.
#[derive(Debug)]
pub struct TopicEvents {
    topic: String,
    rx: broadcast::Receiver<ListenerEvent>,
}

impl TopicEvents {
    pub(crate) fn new(topic: impl Into<String>, rx: broadcast::Receiver<ListenerEvent>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    /// The topic this receiver follows.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next notification on the topic.
    ///
    /// Fails with [`RecvError::Lagged`] when events were dropped and with
    /// [`RecvError::Closed`] once the listener is gone.
    pub async fn recv(&mut self) -> Result<Notification, RecvError> {
        loop {
            if let ListenerEvent::Notification(n) = self.rx.recv().await? {
                if n.channel == self.topic {
                    return Ok(n);
                }
            }
        }
    }
}
