//! # Partitioned-Log Transport (Kafka)
//!
//! Appends events to one configured topic, keyed by event id. The
//! `bundles/<name>` topic argument is not a valid Kafka topic name, so it
//! travels inside the envelope as `subject` and consumers filter on it.
//!
//! The `kafka` client is blocking; sends run on the blocking pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kafka::producer::{Producer, Record, RequiredAcks};
use parking_lot::Mutex;
use pecp_core::ChangeEvent;

use crate::factory::TransportError;
use crate::publisher::{record_outcome, EventPublisher};

/// Default log topic.
pub const DEFAULT_TOPIC: &str = "policy-updates";

/// Kafka producer settings.
#[derive(Debug, Clone)]
pub struct KafkaSettings {
    /// Bootstrap brokers, `host:port`.
    pub brokers: Vec<String>,
    /// Topic every event is appended to.
    pub topic: String,
    /// How long to wait for the leader's acknowledgement.
    pub ack_timeout: Duration,
}

impl Default for KafkaSettings {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            topic: DEFAULT_TOPIC.to_string(),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// [`EventPublisher`] backed by a Kafka producer.
pub struct KafkaPublisher {
    producer: Arc<Mutex<Producer>>,
    topic: String,
}

impl std::fmt::Debug for KafkaPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaPublisher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl KafkaPublisher {
    /// Connect to the brokers and fetch topic metadata.
    ///
    /// Runs on the blocking pool. Fails if no broker is reachable.
    pub async fn connect(settings: KafkaSettings) -> Result<Self, TransportError> {
        if settings.brokers.is_empty() {
            return Err(TransportError::Config("kafka brokers must not be empty".into()));
        }
        if settings.topic.trim().is_empty() {
            return Err(TransportError::Config("kafka topic must not be empty".into()));
        }

        let brokers = settings.brokers.clone();
        let producer = tokio::task::spawn_blocking(move || {
            Producer::from_hosts(settings.brokers)
                .with_ack_timeout(settings.ack_timeout)
                .with_required_acks(RequiredAcks::One)
                .create()
        })
        .await
        .map_err(|e| TransportError::Connect {
            transport: "kafka",
            target: brokers.join(","),
            reason: e.to_string(),
        })?
        .map_err(|e| TransportError::Connect {
            transport: "kafka",
            target: brokers.join(","),
            reason: e.to_string(),
        })?;

        tracing::info!(brokers = %brokers.join(","), topic = %settings.topic, "kafka producer ready");
        Ok(Self {
            producer: Arc::new(Mutex::new(producer)),
            topic: settings.topic,
        })
    }

    async fn send(&self, key: String, payload: Vec<u8>) -> Result<(), String> {
        let producer = Arc::clone(&self.producer);
        let topic = self.topic.clone();
        tokio::task::spawn_blocking(move || {
            let record = Record::from_key_value(&topic, key.as_bytes(), payload.as_slice());
            producer.lock().send(&record).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())?
    }
}

#[async_trait]
impl EventPublisher for KafkaPublisher {
    fn transport(&self) -> &'static str {
        "kafka"
    }

    async fn publish(&self, topic: &str, event: &ChangeEvent) {
        let result = match event.to_wire() {
            Ok(payload) => self.send(event.id.clone(), payload).await,
            Err(e) => Err(e.to_string()),
        };
        record_outcome(self.transport(), topic, event, result);
    }
}
