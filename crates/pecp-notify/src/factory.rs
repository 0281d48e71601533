//! # Transport Selection
//!
//! Turns configuration into one concrete [`EventPublisher`]. Connection
//! problems surface here, at startup, rather than on the first publish.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amqp::{AmqpPublisher, AmqpSettings};
use crate::broadcast::{BroadcastHub, BroadcastPublisher};
use crate::kafka::{KafkaPublisher, KafkaSettings};
use crate::publisher::EventPublisher;

/// Which transport carries change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// STOMP over the control plane's own WebSocket endpoint.
    #[default]
    Broadcast,
    /// Kafka topic.
    Kafka,
    /// AMQP exchange.
    Amqp,
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" | "websocket" | "stomp" => Ok(Self::Broadcast),
            "kafka" => Ok(Self::Kafka),
            "amqp" | "rabbitmq" => Ok(Self::Amqp),
            other => Err(TransportError::UnknownTransport(other.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Broadcast => "broadcast",
            Self::Kafka => "kafka",
            Self::Amqp => "amqp",
        })
    }
}

/// Resolved transport configuration.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// In-process hub.
    Broadcast,
    /// Kafka producer.
    Kafka(KafkaSettings),
    /// AMQP publisher.
    Amqp(AmqpSettings),
}

impl TransportConfig {
    /// Transport this configuration selects.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Broadcast => TransportKind::Broadcast,
            Self::Kafka(_) => TransportKind::Kafka,
            Self::Amqp(_) => TransportKind::Amqp,
        }
    }
}

/// Errors building a publisher.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Name does not match any transport.
    #[error("unknown transport {0:?} (expected broadcast, kafka or amqp)")]
    UnknownTransport(String),

    /// Settings are incomplete or contradictory.
    #[error("invalid transport configuration: {0}")]
    Config(String),

    /// The broker could not be reached.
    #[error("{transport} connection to {target} failed: {reason}")]
    Connect {
        /// Transport name.
        transport: &'static str,
        /// Redacted connection target.
        target: String,
        /// Underlying client error.
        reason: String,
    },
}

/// Build the publisher `config` selects.
///
/// `hub` backs the broadcast transport and is ignored otherwise.
pub async fn build_publisher(
    config: &TransportConfig,
    hub: &BroadcastHub,
) -> Result<Arc<dyn EventPublisher>, TransportError> {
    let publisher: Arc<dyn EventPublisher> = match config {
        TransportConfig::Broadcast => Arc::new(BroadcastPublisher::new(hub.clone())),
        TransportConfig::Kafka(settings) => {
            Arc::new(KafkaPublisher::connect(settings.clone()).await?)
        }
        TransportConfig::Amqp(settings) => {
            Arc::new(AmqpPublisher::connect(settings.clone()).await?)
        }
    };
    tracing::info!(transport = publisher.transport(), "event publisher selected");
    Ok(publisher)
}
