//! # pecp-notify: Change Notification
//!
//! Everything between "a policy was edited" and "a client heard about it":
//!
//! - [`detector`] walks the catalog from an edited policy to the bundles it
//!   affects and builds one event per bundle.
//! - [`dispatcher`] queues events off the request path.
//! - [`publisher`] is the transport seam, implemented by [`broadcast`]
//!   (STOMP over WebSocket), [`kafka`] and [`amqp`].
//! - [`factory`] picks the transport from configuration.

pub mod amqp;
pub mod broadcast;
pub mod detector;
pub mod dispatcher;
pub mod factory;
pub mod kafka;
pub mod publisher;

pub use amqp::{redact_uri, AmqpPublisher, AmqpSettings, ExchangeType};
pub use broadcast::{destination_for, BroadcastHub, BroadcastPublisher, Session};
pub use detector::ChangeDetector;
pub use dispatcher::NotificationDispatcher;
pub use factory::{build_publisher, TransportConfig, TransportError, TransportKind};
pub use kafka::{KafkaPublisher, KafkaSettings};
pub use publisher::EventPublisher;
