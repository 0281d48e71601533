//! AMQP 0-9-1 subscriber.
//!
//! Declares the same durable exchange as the control plane, binds a
//! server-named exclusive queue to it and consumes with auto-ack. The queue
//! disappears with the connection.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use pecp_notify::{redact_uri, ExchangeType};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{decode_for_topic, Delivery, NotificationTransport};
use crate::error::AgentError;

const NAME: &str = "amqp";
const CONSUMER_TAG: &str = "pecp-agent";

/// Routing key to bind with. Fanout exchanges ignore it.
fn binding_key(kind: ExchangeType, topic: &str) -> &str {
    match kind {
        ExchangeType::Fanout => "",
        ExchangeType::Topic | ExchangeType::Direct => topic,
    }
}

/// AMQP transport subscriber.
pub struct AmqpTransport {
    uri: String,
    exchange: String,
    exchange_type: ExchangeType,
    connection: Option<Connection>,
    channel: Option<Channel>,
    reader: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for AmqpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmqpTransport")
            .field("uri", &redact_uri(&self.uri))
            .field("exchange", &self.exchange)
            .field("exchange_type", &self.exchange_type)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

impl AmqpTransport {
    /// Subscriber for `exchange` on the broker at `uri`.
    pub fn new(uri: String, exchange: String, exchange_type: ExchangeType) -> Self {
        Self {
            uri,
            exchange,
            exchange_type,
            connection: None,
            channel: None,
            reader: None,
        }
    }

    fn connect_error(&self, e: lapin::Error) -> AgentError {
        AgentError::Connect {
            transport: NAME,
            target: redact_uri(&self.uri),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl NotificationTransport for AmqpTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn connect(&mut self) -> Result<(), AgentError> {
        self.disconnect().await;
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| self.connect_error(e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| self.connect_error(e))?;
        channel
            .exchange_declare(
                &self.exchange,
                self.exchange_type.kind(),
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| self.connect_error(e))?;

        tracing::info!(
            uri = %redact_uri(&self.uri),
            exchange = %self.exchange,
            exchange_type = %self.exchange_type,
            "amqp connection open"
        );
        self.connection = Some(connection);
        self.channel = Some(channel);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::Sender<Delivery>,
    ) -> Result<(), AgentError> {
        let channel = self.channel.clone().ok_or(AgentError::NotConnected(NAME))?;
        let subscribe_error = |e: lapin::Error| AgentError::Subscribe {
            transport: NAME,
            topic: topic.to_string(),
            reason: e.to_string(),
        };

        let queue = channel
            .queue_declare(
                "",
                QueueDeclareOptions {
                    exclusive: true,
                    auto_delete: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_error)?;
        let queue_name = queue.name().as_str().to_string();
        channel
            .queue_bind(
                &queue_name,
                &self.exchange,
                binding_key(self.exchange_type, topic),
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_error)?;
        let mut consumer = channel
            .basic_consume(
                &queue_name,
                CONSUMER_TAG,
                BasicConsumeOptions {
                    no_ack: true,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(subscribe_error)?;

        let subject = topic.to_string();
        let reader = tokio::spawn(async move {
            let reason = loop {
                match consumer.next().await {
                    Some(Ok(delivery)) => {
                        if let Some(event) = decode_for_topic(&delivery.data, &subject) {
                            if sink.send(Delivery::Event(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Err(e)) => break e.to_string(),
                    None => break "consumer cancelled by broker".to_string(),
                }
            };
            let _ = sink.send(Delivery::ConnectionLost(reason)).await;
        });

        tracing::info!(queue = %queue_name, exchange = %self.exchange, %topic, "amqp subscription started");
        self.reader = Some(reader);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(channel) = self.channel.take() {
            let _ = channel.close(200, "agent stopping").await;
        }
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close(200, "agent stopping").await {
                tracing::debug!(error = %e, "amqp connection close failed");
            }
            tracing::info!("amqp connection closed");
        }
    }
}
