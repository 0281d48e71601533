//! # Event Publisher
//!
//! One interface, three transports. `publish` has no error channel: every
//! implementation catches, logs and counts its own failures so a broken
//! transport can never fail the operation that triggered the notification.

use async_trait::async_trait;
use pecp_core::ChangeEvent;

/// Publishes change events on one transport.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Short transport name used in logs and metric labels.
    fn transport(&self) -> &'static str;

    /// Deliver `event` on `topic`, best effort. Never panics, never errors.
    async fn publish(&self, topic: &str, event: &ChangeEvent);
}

/// Record the outcome of one delivery attempt.
pub(crate) fn record_outcome(
    transport: &'static str,
    topic: &str,
    event: &ChangeEvent,
    result: Result<(), String>,
) {
    match result {
        Ok(()) => {
            metrics::counter!("pecp_notifications_published_total", "transport" => transport)
                .increment(1);
            tracing::info!(transport, topic, event_id = %event.id, "notification published");
        }
        Err(error) => {
            metrics::counter!("pecp_notifications_failed_total", "transport" => transport)
                .increment(1);
            tracing::error!(
                transport,
                topic,
                event_id = %event.id,
                %error,
                "notification publish failed"
            );
        }
    }
}
