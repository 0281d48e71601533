//! Kafka consumer-group subscriber.
//!
//! The `kafka` client is blocking, so polling runs on a dedicated thread.
//! The thread checks a stop flag between fetches and each fetch waits at
//! most one poll interval, which bounds how long `disconnect` takes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use async_trait::async_trait;
use kafka::consumer::{Consumer, FetchOffset, GroupOffsetStorage};
use tokio::sync::mpsc;

use super::{decode_for_topic, Delivery, NotificationTransport};
use crate::error::AgentError;

const NAME: &str = "kafka";

/// Consecutive poll failures tolerated before reporting connection loss.
const MAX_POLL_FAILURES: u32 = 5;

/// Kafka transport subscriber.
pub struct KafkaTransport {
    brokers: Vec<String>,
    topic: String,
    group_id: String,
    poll_interval: Duration,
    consumer: Option<Consumer>,
    stop: Arc<AtomicBool>,
    poller: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for KafkaTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaTransport")
            .field("brokers", &self.brokers)
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("poll_interval", &self.poll_interval)
            .field("polling", &self.poller.is_some())
            .finish()
    }
}

impl KafkaTransport {
    /// Subscriber reading `topic` as member of `group_id`.
    pub fn new(
        brokers: Vec<String>,
        topic: String,
        group_id: String,
        poll_interval: Duration,
    ) -> Self {
        Self {
            brokers,
            topic,
            group_id,
            poll_interval,
            consumer: None,
            stop: Arc::new(AtomicBool::new(false)),
            poller: None,
        }
    }
}

#[async_trait]
impl NotificationTransport for KafkaTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn connect(&mut self) -> Result<(), AgentError> {
        self.disconnect().await;
        let brokers: Vec<String> = self
            .brokers
            .iter()
            .map(|b| b.trim().to_string())
            .filter(|b| !b.is_empty())
            .collect();
        if brokers.is_empty() {
            return Err(AgentError::Config("kafka transport requires brokers".into()));
        }
        let target = brokers.join(",");
        let topic = self.topic.clone();
        let group = self.group_id.clone();
        let wait = self.poll_interval;

        // Only offsets committed after joining matter; a new group starts
        // at the log end so stale updates are not replayed.
        let consumer = tokio::task::spawn_blocking(move || {
            Consumer::from_hosts(brokers)
                .with_topic(topic)
                .with_group(group)
                .with_fallback_offset(FetchOffset::Latest)
                .with_offset_storage(Some(GroupOffsetStorage::Kafka))
                .with_fetch_max_wait_time(wait)
                .create()
        })
        .await
        .map_err(|e| AgentError::Connect {
            transport: NAME,
            target: target.clone(),
            reason: e.to_string(),
        })?
        .map_err(|e| AgentError::Connect {
            transport: NAME,
            target: target.clone(),
            reason: e.to_string(),
        })?;

        tracing::info!(brokers = %target, topic = %self.topic, group = %self.group_id, "kafka consumer joined");
        self.consumer = Some(consumer);
        Ok(())
    }

    async fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::Sender<Delivery>,
    ) -> Result<(), AgentError> {
        let mut consumer = self.consumer.take().ok_or(AgentError::NotConnected(NAME))?;
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = Arc::clone(&stop);
        let subject = topic.to_string();
        let interval = self.poll_interval;

        let poller = std::thread::Builder::new()
            .name("pecp-kafka-poll".into())
            .spawn(move || {
                run_poll_loop(&stop, interval, &subject, &sink, || {
                    let sets = consumer.poll().map_err(|e| e.to_string())?;
                    let mut payloads = Vec::new();
                    for set in sets.iter() {
                        payloads.extend(set.messages().iter().map(|m| m.value.to_vec()));
                        consumer
                            .consume_messageset(set)
                            .map_err(|e| e.to_string())?;
                    }
                    if !payloads.is_empty() {
                        consumer.commit_consumed().map_err(|e| e.to_string())?;
                    }
                    Ok(payloads)
                });
            })
            .map_err(|e| AgentError::Subscribe {
                transport: NAME,
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        tracing::info!(kafka_topic = %self.topic, subject = %topic, "kafka subscription started");
        self.poller = Some(poller);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.consumer = None;
        if let Some(poller) = self.poller.take() {
            let joined = tokio::task::spawn_blocking(move || poller.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                tracing::warn!("kafka poll thread did not shut down cleanly");
            }
            tracing::info!("kafka consumer stopped");
        }
    }
}

/// Poll until `stop` is set, forwarding payloads whose subject is `topic`.
///
/// `poll` performs one bounded fetch. After [`MAX_POLL_FAILURES`]
/// consecutive failures the loop reports connection loss and returns.
fn run_poll_loop<F>(
    stop: &AtomicBool,
    interval: Duration,
    topic: &str,
    sink: &mpsc::Sender<Delivery>,
    mut poll: F,
) where
    F: FnMut() -> Result<Vec<Vec<u8>>, String>,
{
    let mut failures = 0;
    while !stop.load(Ordering::SeqCst) {
        match poll() {
            Ok(payloads) => {
                failures = 0;
                for payload in payloads {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(event) = decode_for_topic(&payload, topic) {
                        if sink.blocking_send(Delivery::Event(event)).is_err() {
                            return;
                        }
                    }
                }
            }
            Err(reason) => {
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                failures += 1;
                tracing::warn!(error = %reason, failures, "kafka poll failed");
                if failures >= MAX_POLL_FAILURES {
                    let _ = sink.blocking_send(Delivery::ConnectionLost(reason));
                    return;
                }
                std::thread::sleep(interval);
            }
        }
    }
}
