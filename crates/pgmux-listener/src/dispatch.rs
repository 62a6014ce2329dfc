//! Notification dispatch.
//!
//! Two tasks per listener. The dispatcher reads the listening connection's
//! event stream, drops notifications for topics nobody subscribes to,
//! decodes payloads and queues one delivery per callback. The delivery task
//! drains that queue and runs the callbacks, so a callback always runs after
//! the dispatch step that queued it and never inside it.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use pgmux_client::ConnectionEvent;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PayloadFormat;
use crate::error::ListenerEventError;
use crate::events::ListenerEvent;
use crate::notification::{Notification, Payload};
use crate::subscription::{Callback, SubscriptionTable};

struct Delivery {
    notification: Arc<Notification>,
    callback: Callback,
}

pub(crate) struct Dispatcher {
    table: Arc<Mutex<SubscriptionTable>>,
    events: broadcast::Sender<ListenerEvent>,
    payload: PayloadFormat,
    deliveries: mpsc::UnboundedSender<Delivery>,
}

/// Handles of the running dispatch tasks.
pub(crate) struct DispatchTasks {
    pub(crate) dispatcher: JoinHandle<()>,
    pub(crate) delivery: JoinHandle<()>,
}

/// Start dispatching `source` until `shutdown` is cancelled or the stream ends.
pub(crate) fn spawn(
    source: broadcast::Receiver<ConnectionEvent>,
    table: Arc<Mutex<SubscriptionTable>>,
    events: broadcast::Sender<ListenerEvent>,
    payload: PayloadFormat,
    shutdown: CancellationToken,
) -> DispatchTasks {
    let (tx, rx) = mpsc::unbounded_channel();
    let delivery = tokio::spawn(deliver(rx, events.clone()));
    let dispatcher = Dispatcher {
        table,
        events,
        payload,
        deliveries: tx,
    };
    let dispatcher = tokio::spawn(dispatcher.run(source, shutdown));
    DispatchTasks {
        dispatcher,
        delivery,
    }
}

impl Dispatcher {
    async fn run(self, mut source: broadcast::Receiver<ConnectionEvent>, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = source.recv() => event,
            };

            match event {
                Ok(ConnectionEvent::Notification(raw)) => self.dispatch(raw),
                Ok(ConnectionEvent::Notice(notice)) => {
                    let _ = self.events.send(ListenerEvent::Notice(notice));
                }
                Ok(ConnectionEvent::Error(message)) => {
                    tracing::error!(error = %message, "listener connection failed");
                    self.emit_error(ListenerEventError::Connection(message));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "listener dispatcher lagged");
                    self.emit_error(ListenerEventError::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("listener dispatcher stopped");
    }

    fn dispatch(&self, raw: pgmux_client::Notification) {
        let Some(callbacks) = self.table.lock().callbacks(&raw.channel) else {
            tracing::trace!(channel = %raw.channel, "dropping notification for unsubscribed topic");
            return;
        };

        let notification = match decode(self.payload, raw) {
            Ok(notification) => Arc::new(notification),
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode notification payload");
                self.emit_error(e);
                return;
            }
        };

        tracing::trace!(
            channel = %notification.channel,
            subscribers = callbacks.len(),
            "dispatching notification"
        );
        let _ = self
            .events
            .send(ListenerEvent::Notification(Notification::clone(&notification)));

        for callback in callbacks {
            let delivery = Delivery {
                notification: Arc::clone(&notification),
                callback,
            };
            if self.deliveries.send(delivery).is_err() {
                tracing::debug!("delivery queue closed, dropping notification");
                return;
            }
        }
    }

    fn emit_error(&self, error: ListenerEventError) {
        let _ = self.events.send(ListenerEvent::Error(error));
    }
}

async fn deliver(mut queue: mpsc::UnboundedReceiver<Delivery>, events: broadcast::Sender<ListenerEvent>) {
    while let Some(delivery) = queue.recv().await {
        let Delivery {
            notification,
            callback,
        } = delivery;

        if catch_unwind(AssertUnwindSafe(|| callback.call(&notification))).is_err() {
            tracing::error!(channel = %notification.channel, "subscriber callback panicked");
            let _ = events.send(ListenerEvent::Error(ListenerEventError::CallbackPanicked {
                channel: notification.channel.clone(),
            }));
        }
    }
}

/// Decode a raw notification according to the payload format.
pub(crate) fn decode(
    format: PayloadFormat,
    raw: pgmux_client::Notification,
) -> Result<Notification, ListenerEventError> {
    let payload = match format {
        PayloadFormat::Text => Payload::Text(raw.payload),
        PayloadFormat::Json => match serde_json::from_str(&raw.payload) {
            Ok(value) => Payload::Json(value),
            Err(e) => {
                return Err(ListenerEventError::DecodeFailed {
                    channel: raw.channel,
                    message: e.to_string(),
                });
            }
        },
    };

    Ok(Notification {
        channel: raw.channel,
        payload,
        process_id: raw.process_id,
    })
}
