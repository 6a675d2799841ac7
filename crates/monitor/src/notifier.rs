//! Asynchronous status event delivery.
//!
//! Events are queued on a bounded channel and delivered by a small pool of
//! workers, so a slow subscriber never holds up a state transition.

use std::sync::Arc;
use async_trait::async_trait;
use exertion_core::StatusEvent;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Delivery failure reported by a subscriber.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Receives status events.
#[async_trait]
pub trait StatusSubscriber: Send + Sync {
    /// Deliver one event.
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError>;
}

/// Forwards events into an unbounded channel.
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelSubscriber {
    /// Create a subscriber and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StatusSubscriber for ChannelSubscriber {
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError> {
        self.tx
            .send(event)
            .map_err(|_| NotifyError("receiver dropped".to_string()))
    }
}

/// Writes every event to the log.
#[derive(Debug, Default)]
pub struct LoggingSubscriber;

#[async_trait]
impl StatusSubscriber for LoggingSubscriber {
    async fn notify(&self, event: StatusEvent) -> Result<(), NotifyError> {
        info!(
            session = %event.session,
            unit = %event.snapshot.name,
            "status {}",
            event.status
        );
        Ok(())
    }
}

/// Bounded event queue drained by a worker pool.
pub struct EventNotifier {
    tx: mpsc::Sender<StatusEvent>,
}

impl EventNotifier {
    /// Spawn `workers` delivery tasks sharing one queue of `capacity` events.
    pub fn spawn(
        workers: usize,
        capacity: usize,
        subscribers: Vec<Arc<dyn StatusSubscriber>>,
    ) -> Self {
        let (tx, rx) = mpsc::channel::<StatusEvent>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let subscribers = Arc::new(subscribers);

        for worker in 0..workers.max(1) {
            let rx = Arc::clone(&rx);
            let subscribers = Arc::clone(&subscribers);
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(event) = next else { break };
                    for subscriber in subscribers.iter() {
                        if let Err(e) = subscriber.notify(event.clone()).await {
                            warn!("Event delivery for session {} failed: {}", event.session, e);
                        }
                    }
                }
                debug!("Notifier worker {} stopped", worker);
            });
        }

        Self { tx }
    }

    /// Queue an event; when the queue is full the event is dropped.
    pub fn publish(&self, event: StatusEvent) {
        if let Err(e) = self.tx.try_send(event) {
            match e {
                mpsc::error::TrySendError::Full(event) => {
                    warn!("Event queue full, dropping {} for session {}", event.status, event.session)
                }
                mpsc::error::TrySendError::Closed(_) => warn!("Event queue closed"),
            }
        }
    }
}
