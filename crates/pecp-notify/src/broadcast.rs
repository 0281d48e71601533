//! # Broadcast Transport
//!
//! In-process pub/sub hub behind the control plane's STOMP-over-WebSocket
//! endpoint. Each WebSocket connection opens a [`Session`]; the session
//! registers STOMP subscriptions against destinations like
//! `/topic/bundles/finance`. Publishing encodes one `MESSAGE` frame per
//! matching subscription and pushes it onto the connection's outbound queue.
//!
//! Delivery is at-most-once. A subscriber whose queue is full misses the
//! event; a subscriber whose connection is gone is pruned.
//!
//! The hub owns the active-connection counter. Status endpoints read it
//! through [`BroadcastHub::active_connections`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use pecp_core::stomp::{Command, Frame};
use pecp_core::ChangeEvent;
use tokio::sync::mpsc;

use crate::publisher::{record_outcome, EventPublisher};

/// Default capacity of a session's outbound frame queue.
pub const DEFAULT_SESSION_QUEUE: usize = 64;

/// Destination a topic is published to.
pub fn destination_for(topic: &str) -> String {
    format!("/topic/{topic}")
}

#[derive(Debug, Clone)]
struct Subscriber {
    session: u64,
    subscription: String,
    outbound: mpsc::Sender<Vec<u8>>,
}

#[derive(Debug, Default)]
struct HubInner {
    // destination -> subscribers
    routes: RwLock<HashMap<String, Vec<Subscriber>>>,
    next_session: AtomicU64,
    next_message: AtomicU64,
    active: AtomicUsize,
}

/// Shared broadcast hub. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
    session_queue: Option<usize>,
}

impl BroadcastHub {
    /// Hub with the default per-session queue size.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hub with a custom per-session queue size.
    pub fn with_session_queue(capacity: usize) -> Self {
        Self {
            inner: Arc::default(),
            session_queue: Some(capacity.max(1)),
        }
    }

    /// Number of open sessions.
    pub fn active_connections(&self) -> usize {
        self.inner.active.load(Ordering::Relaxed)
    }

    /// Number of subscriptions registered for `destination`.
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.inner
            .routes
            .read()
            .get(destination)
            .map_or(0, Vec::len)
    }

    /// Open a session for a new connection.
    ///
    /// The receiver yields encoded frames to write to the connection. The
    /// session unregisters itself and decrements the connection count when
    /// dropped.
    pub fn open_session(&self) -> (Session, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(self.session_queue.unwrap_or(DEFAULT_SESSION_QUEUE));
        let id = self.inner.next_session.fetch_add(1, Ordering::Relaxed);
        let active = self.inner.active.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(session = id, active, "broadcast session opened");
        (
            Session {
                hub: self.clone(),
                id,
                outbound: tx,
            },
            rx,
        )
    }

    /// Encode `body` as a `MESSAGE` frame for every subscription on
    /// `destination`. Returns how many subscribers accepted it.
    pub fn deliver(&self, destination: &str, body: &[u8]) -> usize {
        let subscribers = match self.inner.routes.read().get(destination) {
            Some(subs) => subs.clone(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for sub in subscribers {
            let message_id = self.inner.next_message.fetch_add(1, Ordering::Relaxed);
            let frame = Frame::new(Command::Message)
                .header("destination", destination)
                .header("subscription", sub.subscription.as_str())
                .header("message-id", message_id.to_string())
                .header("content-type", "application/json")
                .body(body.to_vec());
            match sub.outbound.try_send(frame.encode()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        session = sub.session,
                        destination,
                        "subscriber queue full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(sub.session),
            }
        }

        if !closed.is_empty() {
            let mut routes = self.inner.routes.write();
            if let Some(subs) = routes.get_mut(destination) {
                subs.retain(|s| !closed.contains(&s.session));
            }
        }
        delivered
    }

    fn remove_session(&self, session: u64) {
        let mut routes = self.inner.routes.write();
        for subs in routes.values_mut() {
            subs.retain(|s| s.session != session);
        }
        routes.retain(|_, subs| !subs.is_empty());
    }
}

/// One connection's view of the hub.
#[derive(Debug)]
pub struct Session {
    hub: BroadcastHub,
    id: u64,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl Session {
    /// Session id, unique per hub.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Register subscription `subscription` on `destination`.
    pub fn subscribe(&self, destination: &str, subscription: &str) {
        let mut routes = self.hub.inner.routes.write();
        let subs = routes.entry(destination.to_string()).or_default();
        subs.retain(|s| !(s.session == self.id && s.subscription == subscription));
        subs.push(Subscriber {
            session: self.id,
            subscription: subscription.to_string(),
            outbound: self.outbound.clone(),
        });
        tracing::debug!(session = self.id, destination, subscription, "subscribed");
    }

    /// Drop subscription `subscription`, wherever it was registered.
    pub fn unsubscribe(&self, subscription: &str) {
        let mut routes = self.hub.inner.routes.write();
        for subs in routes.values_mut() {
            subs.retain(|s| !(s.session == self.id && s.subscription == subscription));
        }
        routes.retain(|_, subs| !subs.is_empty());
    }

    /// Queue a frame for this connection only (`CONNECTED`, `RECEIPT`, `ERROR`).
    pub fn reply(&self, frame: &Frame) -> bool {
        self.outbound.try_send(frame.encode()).is_ok()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.hub.remove_session(self.id);
        let active = self
            .hub
            .inner
            .active
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        tracing::info!(session = self.id, active, "broadcast session closed");
    }
}

/// [`EventPublisher`] that fans events out through a [`BroadcastHub`].
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    hub: BroadcastHub,
}

impl BroadcastPublisher {
    /// Publisher over `hub`.
    pub fn new(hub: BroadcastHub) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    fn transport(&self) -> &'static str {
        "broadcast"
    }

    async fn publish(&self, topic: &str, event: &ChangeEvent) {
        let result = event.to_wire().map_err(|e| e.to_string()).map(|body| {
            let destination = destination_for(topic);
            let delivered = self.hub.deliver(&destination, &body);
            tracing::debug!(%destination, delivered, "broadcast delivered");
        });
        record_outcome(self.transport(), topic, event, result);
    }
}
