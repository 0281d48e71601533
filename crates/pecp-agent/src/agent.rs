//! # Sync Agent
//!
//! Drives one transport and one [`BundleSync`] through the lifecycle
//!
//! ```text
//! Disconnected -> Connecting -> Subscribed -> Downloading -> Applying -> Subscribed
//! ```
//!
//! The first connect happens in [`SyncAgent::start`] and its failure is
//! returned to the caller. Once running, a lost connection is re-established
//! with exponential backoff until [`AgentHandle::stop`] is called. Failed
//! downloads and applies are logged, counted and otherwise ignored.

use std::fmt;
use std::time::Duration;

use pecp_core::ChangeEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::{AgentConfig, ReconnectSettings};
use crate::error::AgentError;
use crate::sync::BundleSync;
use crate::transport::{build_transport, Delivery, NotificationTransport};

/// Deliveries buffered between a transport and the agent loop.
const DELIVERY_BUFFER: usize = 32;

/// Observable agent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// No connection.
    Disconnected,
    /// Connecting and subscribing.
    Connecting,
    /// Waiting for events.
    Subscribed,
    /// Fetching a bundle.
    Downloading,
    /// Pushing a bundle to the enforcement runtime.
    Applying,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Downloading => "downloading",
            Self::Applying => "applying",
        })
    }
}

/// Result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Downloaded and accepted by the enforcement runtime.
    Applied,
    /// Downloaded; auto-apply is off.
    Downloaded,
    /// Download failed; update dropped.
    DownloadFailed,
    /// Enforcement runtime rejected or could not be reached.
    ApplyFailed,
}

impl UpdateOutcome {
    /// Metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Downloaded => "downloaded",
            Self::DownloadFailed => "download_failed",
            Self::ApplyFailed => "apply_failed",
        }
    }
}

/// Exponential reconnect delay: doubles per attempt, capped, reset after a
/// successful subscribe.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    /// Backoff starting at `initial` and never exceeding `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            next: initial,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over from the initial delay.
    pub fn reset(&mut self) {
        self.next = self.initial;
    }
}

impl From<ReconnectSettings> for Backoff {
    fn from(settings: ReconnectSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.initial_backoff_ms),
            Duration::from_millis(settings.max_backoff_ms),
        )
    }
}

/// Download/apply half of the agent plus the state it publishes.
///
/// Kept apart from the transport so it can be borrowed across awaits
/// without requiring the transport to be `Sync`.
struct UpdateHandler {
    sync: BundleSync,
    state: watch::Sender<AgentState>,
    transport: &'static str,
}

impl UpdateHandler {
    fn set_state(&self, next: AgentState) {
        let mut previous = next;
        let changed = self.state.send_if_modified(|current| {
            previous = *current;
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::info!(from = %previous, to = %next, transport = self.transport, "agent state changed");
        }
    }

    /// Download the event's bundle and, with auto-apply, push it.
    async fn handle_event(&self, event: &ChangeEvent) -> UpdateOutcome {
        let data = &event.data;
        tracing::info!(
            event_id = %event.id,
            bundle = %data.bundle_name,
            version = %data.version,
            "bundle update received"
        );

        self.set_state(AgentState::Downloading);
        let outcome = match self.sync.download(&data.download_url).await {
            Err(e) => {
                tracing::warn!(bundle = %data.bundle_name, error = %e, "bundle download failed, update dropped");
                UpdateOutcome::DownloadFailed
            }
            Ok(bundle) if !self.sync.auto_apply() => {
                tracing::info!(bundle = %data.bundle_name, bytes = bundle.len(), "bundle downloaded");
                UpdateOutcome::Downloaded
            }
            Ok(bundle) => {
                self.set_state(AgentState::Applying);
                let bytes = bundle.len();
                match self.sync.apply(&data.bundle_name, bundle).await {
                    Ok(()) => {
                        tracing::info!(bundle = %data.bundle_name, bytes, "bundle applied");
                        UpdateOutcome::Applied
                    }
                    Err(e) => {
                        tracing::warn!(bundle = %data.bundle_name, error = %e, "bundle apply failed");
                        UpdateOutcome::ApplyFailed
                    }
                }
            }
        };
        metrics::counter!("pecp_agent_updates_total", "outcome" => outcome.as_str()).increment(1);
        self.set_state(AgentState::Subscribed);
        outcome
    }
}

/// A configured, not yet started agent.
pub struct SyncAgent {
    transport: Box<dyn NotificationTransport>,
    handler: UpdateHandler,
    topic: String,
    backoff: Backoff,
}

impl fmt::Debug for SyncAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncAgent")
            .field("transport", &self.transport.name())
            .field("topic", &self.topic)
            .field("state", &*self.handler.state.borrow())
            .finish_non_exhaustive()
    }
}

impl SyncAgent {
    /// Agent using the transport the configuration selects.
    pub fn from_config(config: &AgentConfig) -> Result<Self, AgentError> {
        config.validate()?;
        Self::with_transport(config, build_transport(config)?)
    }

    /// Agent using an explicit transport.
    pub fn with_transport(
        config: &AgentConfig,
        transport: Box<dyn NotificationTransport>,
    ) -> Result<Self, AgentError> {
        let (state, _) = watch::channel(AgentState::Disconnected);
        let handler = UpdateHandler {
            sync: BundleSync::new(config)?,
            state,
            transport: transport.name(),
        };
        Ok(Self {
            transport,
            handler,
            topic: config.topic(),
            backoff: config.reconnect.into(),
        })
    }

    /// Receiver tracking the agent state.
    pub fn state(&self) -> watch::Receiver<AgentState> {
        self.handler.state.subscribe()
    }

    /// Connect, subscribe and run in the background.
    ///
    /// Returns the connection error if the first attempt fails.
    pub async fn start(mut self) -> Result<AgentHandle, AgentError> {
        let deliveries = self.establish().await?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = self.handler.state.subscribe();
        let task = tokio::spawn(self.run(deliveries, stop_rx));
        Ok(AgentHandle {
            state,
            stop: stop_tx,
            task,
        })
    }

    async fn establish(&mut self) -> Result<mpsc::Receiver<Delivery>, AgentError> {
        self.handler.set_state(AgentState::Connecting);
        let (tx, rx) = mpsc::channel(DELIVERY_BUFFER);
        let attempt = match self.transport.connect().await {
            Ok(()) => self.transport.subscribe(&self.topic, tx).await,
            Err(e) => Err(e),
        };
        match attempt {
            Ok(()) => {
                self.backoff.reset();
                self.handler.set_state(AgentState::Subscribed);
                Ok(rx)
            }
            Err(e) => {
                self.transport.disconnect().await;
                self.handler.set_state(AgentState::Disconnected);
                Err(e)
            }
        }
    }

    async fn run(mut self, mut deliveries: mpsc::Receiver<Delivery>, mut stop: watch::Receiver<bool>) {
        loop {
            let delivery = tokio::select! {
                biased;
                _ = stop.changed() => break,
                delivery = deliveries.recv() => delivery,
            };
            let lost = match delivery {
                Some(Delivery::Event(event)) => {
                    tokio::select! {
                        biased;
                        _ = stop.changed() => break,
                        _ = self.handler.handle_event(&event) => {}
                    }
                    continue;
                }
                Some(Delivery::ConnectionLost(reason)) => reason,
                None => "delivery channel closed".to_string(),
            };

            tracing::warn!(transport = self.transport.name(), reason = %lost, "connection lost");
            drop(deliveries);
            match self.reconnect(&mut stop).await {
                Some(fresh) => deliveries = fresh,
                None => {
                    self.handler.set_state(AgentState::Disconnected);
                    tracing::info!(topic = %self.topic, "agent stopped while reconnecting");
                    return;
                }
            }
        }
        drop(deliveries);
        self.transport.disconnect().await;
        self.handler.set_state(AgentState::Disconnected);
        tracing::info!(topic = %self.topic, "agent stopped");
    }

    /// Retry until subscribed again or stopped. `None` means stopped.
    async fn reconnect(&mut self, stop: &mut watch::Receiver<bool>) -> Option<mpsc::Receiver<Delivery>> {
        self.transport.disconnect().await;
        self.handler.set_state(AgentState::Disconnected);
        loop {
            let delay = self.backoff.next_delay();
            tracing::info!(delay_ms = delay.as_millis() as u64, "reconnecting");
            tokio::select! {
                biased;
                _ = stop.changed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            let attempt = tokio::select! {
                biased;
                _ = stop.changed() => None,
                attempt = self.establish() => Some(attempt),
            };
            match attempt {
                None => {
                    self.transport.disconnect().await;
                    return None;
                }
                Some(Ok(deliveries)) => return Some(deliveries),
                Some(Err(e)) => tracing::warn!(error = %e, "reconnect failed"),
            }
        }
    }
}

/// Handle on a running agent.
#[derive(Debug)]
pub struct AgentHandle {
    state: watch::Receiver<AgentState>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl AgentHandle {
    /// Current state.
    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    /// Receiver tracking the agent state.
    pub fn watch_state(&self) -> watch::Receiver<AgentState> {
        self.state.clone()
    }

    /// Whether the agent loop has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the agent and wait for it to disconnect. Never reconnects.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "agent task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = Backoff::from(ReconnectSettings::default());
        let delays: Vec<u64> = (0..9).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60, 60]);
    }

    #[test]
    fn backoff_reset_starts_over() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn initial_above_cap_is_clamped() {
        let mut backoff = Backoff::new(Duration::from_secs(90), Duration::from_secs(60));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(UpdateOutcome::DownloadFailed.as_str(), "download_failed");
        assert_eq!(AgentState::Applying.to_string(), "applying");
    }
}
