//! # pecp-agent: Client Sync Agent
//!
//! Runs next to an enforcement runtime and keeps one bundle current:
//!
//! 1. subscribe to `bundles/<name>` over the transport the control plane
//!    publishes on ([`transport`]);
//! 2. on each change event, download the bundle ([`sync`]);
//! 3. optionally push it to the enforcement runtime.
//!
//! [`agent`] owns the lifecycle and reconnect policy; [`config`] and
//! [`cli`] assemble the settings.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod sync;
pub mod transport;

pub use agent::{AgentHandle, AgentState, Backoff, SyncAgent, UpdateOutcome};
pub use config::{AgentConfig, ReconnectSettings, TransportSettings};
pub use error::AgentError;
pub use sync::{BundleSync, SyncError};
pub use transport::{build_transport, Delivery, NotificationTransport};
