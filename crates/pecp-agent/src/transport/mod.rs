//! # Subscriber Transports
//!
//! Client-side counterparts of the control plane's publishers. Each
//! transport owns its connection and pushes [`Delivery`] values into an
//! mpsc channel; the agent loop never touches transport internals.
//!
//! Transports that share one stream across bundles (a Kafka topic, a fanout
//! exchange) see every bundle's events. [`decode_for_topic`] drops those
//! whose `subject` is not the subscribed topic.

pub mod amqp;
pub mod kafka;
pub mod websocket;

use async_trait::async_trait;
use pecp_core::ChangeEvent;
use tokio::sync::mpsc;

use crate::config::{AgentConfig, TransportSettings};
use crate::error::AgentError;

pub use amqp::AmqpTransport;
pub use kafka::KafkaTransport;
pub use websocket::WebSocketTransport;

/// What a transport hands to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// A decoded event for the subscribed topic.
    Event(ChangeEvent),
    /// The connection ended without a local `disconnect`.
    ConnectionLost(String),
}

/// One subscriber connection.
#[async_trait]
pub trait NotificationTransport: Send {
    /// Short transport name for logs and metrics.
    fn name(&self) -> &'static str;

    /// Open the connection. Failures are returned, never retried here.
    async fn connect(&mut self) -> Result<(), AgentError>;

    /// Register interest in `topic`. Deliveries go to `sink` until
    /// [`disconnect`](Self::disconnect) or connection loss.
    async fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::Sender<Delivery>,
    ) -> Result<(), AgentError>;

    /// Release the connection and stop delivering. Idempotent.
    async fn disconnect(&mut self);
}

/// Build the transport `config` selects. Nothing is connected yet.
pub fn build_transport(config: &AgentConfig) -> Result<Box<dyn NotificationTransport>, AgentError> {
    let transport: Box<dyn NotificationTransport> = match &config.transport {
        TransportSettings::Broadcast { .. } => Box::new(WebSocketTransport::new(config.ws_url()?)),
        TransportSettings::Kafka { brokers, topic, .. } => Box::new(KafkaTransport::new(
            brokers.clone(),
            topic.clone(),
            config.kafka_group_id(),
            config.poll_interval(),
        )),
        TransportSettings::Amqp {
            uri,
            exchange,
            exchange_kind,
        } => Box::new(AmqpTransport::new(uri.clone(), exchange.clone(), *exchange_kind)),
    };
    Ok(transport)
}

/// Decode a wire payload and keep it only if it belongs to `topic`.
pub fn decode_for_topic(payload: &[u8], topic: &str) -> Option<ChangeEvent> {
    match ChangeEvent::from_wire(payload) {
        Ok(event) if event.subject == topic => Some(event),
        Ok(event) => {
            tracing::trace!(subject = %event.subject, %topic, "ignoring event for another topic");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, bytes = payload.len(), "undecodable notification payload");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pecp_core::event::DEFAULT_SOURCE;

    fn wire(name: &str) -> Vec<u8> {
        ChangeEvent::bundle_update(DEFAULT_SOURCE, name, format!("/bundles/{name}/download"))
            .to_wire()
            .unwrap()
    }

    #[test]
    fn matching_subject_is_kept() {
        let event = decode_for_topic(&wire("finance"), "bundles/finance").unwrap();
        assert_eq!(event.data.bundle_name, "finance");
    }

    #[test]
    fn other_bundles_are_filtered() {
        assert!(decode_for_topic(&wire("hr"), "bundles/finance").is_none());
    }

    #[test]
    fn garbage_is_dropped() {
        assert!(decode_for_topic(b"{not json", "bundles/finance").is_none());
    }

    #[test]
    fn factory_picks_configured_transport() {
        let cfg = AgentConfig::new("http://plane:8080", "finance");
        assert_eq!(build_transport(&cfg).unwrap().name(), "broadcast");

        let mut cfg = cfg;
        cfg.transport = TransportSettings::Kafka {
            brokers: vec!["k:9092".into()],
            topic: "policy-updates".into(),
            group_id: None,
        };
        assert_eq!(build_transport(&cfg).unwrap().name(), "kafka");
    }
}
