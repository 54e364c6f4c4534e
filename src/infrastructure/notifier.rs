use crate::domain::ports::{Notifier, NotifyError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A message accepted for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub message_id: String,
    pub channel: String,
    pub text: String,
    pub queued_at: DateTime<Utc>,
}

/// Notifier that enqueues messages on a bounded outbox.
///
/// Delivery happens on whatever drains the receiving end, so a slow transport
/// never holds up a payment. A full or closed outbox is reported as a failure.
#[derive(Clone)]
pub struct QueueNotifier {
    outbox: mpsc::Sender<Notification>,
}

impl QueueNotifier {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (outbox, receiver) = mpsc::channel(capacity.max(1));
        (Self { outbox }, receiver)
    }
}

#[async_trait]
impl Notifier for QueueNotifier {
    async fn send(&self, channel: &str, text: &str) -> Result<String, NotifyError> {
        let notification = Notification {
            message_id: Uuid::new_v4().to_string(),
            channel: channel.to_string(),
            text: text.to_string(),
            queued_at: Utc::now(),
        };
        let message_id = notification.message_id.clone();

        match self.outbox.try_send(notification) {
            Ok(()) => Ok(message_id),
            Err(TrySendError::Full(_)) => Err(NotifyError("notification outbox is full".into())),
            Err(TrySendError::Closed(_)) => {
                Err(NotifyError("notification outbox is closed".into()))
            }
        }
    }
}

/// Drains the outbox into the log until every sender is dropped. Resolves to
/// the number of delivered messages.
pub fn spawn_log_delivery(mut receiver: mpsc::Receiver<Notification>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut delivered = 0;
        while let Some(notification) = receiver.recv().await {
            tracing::info!(
                message_id = %notification.message_id,
                channel = %notification.channel,
                "{}",
                notification.text
            );
            delivered += 1;
        }
        delivered
    })
}
