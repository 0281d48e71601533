//! # Notification Dispatcher
//!
//! Decouples the request path from the transport. Callers enqueue
//! `(topic, event)` pairs without waiting; one background task drains the
//! queue and hands each pair to the publisher in arrival order. A full queue
//! drops the event with a warning.

use std::sync::Arc;
use std::time::Duration;

use pecp_core::ChangeEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::publisher::EventPublisher;

/// Default queue depth.
pub const DEFAULT_CAPACITY: usize = 256;

/// Default bound on a single publish call.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct Job {
    topic: String,
    event: ChangeEvent,
}

/// Handle used to enqueue notifications. Cheap to clone.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    queue: mpsc::Sender<Job>,
}

impl NotificationDispatcher {
    /// Start the consumer task on the current runtime.
    ///
    /// The task ends once every dispatcher handle has been dropped and the
    /// queue is drained.
    pub fn spawn(
        publisher: Arc<dyn EventPublisher>,
        capacity: usize,
        send_timeout: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = tokio::spawn(drain(publisher, rx, send_timeout));
        (Self { queue: tx }, handle)
    }

    /// Enqueue `event` for `topic`. Returns `false` if it was dropped.
    pub fn notify(&self, topic: impl Into<String>, event: ChangeEvent) -> bool {
        let job = Job {
            topic: topic.into(),
            event,
        };
        match self.queue.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                metrics::counter!("pecp_notifications_dropped_total").increment(1);
                tracing::warn!(
                    topic = %job.topic,
                    event_id = %job.event.id,
                    "notification queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::error!(
                    topic = %job.topic,
                    event_id = %job.event.id,
                    "notification consumer stopped, dropping event"
                );
                false
            }
        }
    }
}

async fn drain(
    publisher: Arc<dyn EventPublisher>,
    mut rx: mpsc::Receiver<Job>,
    send_timeout: Duration,
) {
    while let Some(job) = rx.recv().await {
        let publish = publisher.publish(&job.topic, &job.event);
        if tokio::time::timeout(send_timeout, publish).await.is_err() {
            metrics::counter!("pecp_notifications_failed_total", "transport" => publisher.transport())
                .increment(1);
            tracing::error!(
                transport = publisher.transport(),
                topic = %job.topic,
                event_id = %job.event.id,
                timeout_ms = send_timeout.as_millis() as u64,
                "notification publish timed out"
            );
        }
    }
    tracing::debug!("notification dispatcher stopped");
}
