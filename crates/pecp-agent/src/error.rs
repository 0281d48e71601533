//! Agent error types.

use thiserror::Error;

/// Errors surfaced by the sync agent.
///
/// Only configuration and connection problems reach the caller. Failures
/// while handling a single update are logged and counted instead.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration is missing, malformed or contradictory.
    #[error("invalid agent configuration: {0}")]
    Config(String),

    /// Configuration file could not be read.
    #[error("failed to read {path}: {source}")]
    ReadConfig {
        /// File that was requested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for [`crate::AgentConfig`].
    #[error("failed to parse {path}: {source}")]
    ParseConfig {
        /// File that was requested.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The transport could not reach its server or broker.
    #[error("{transport} connection to {target} failed: {reason}")]
    Connect {
        /// Transport name.
        transport: &'static str,
        /// Redacted connection target.
        target: String,
        /// Underlying client error.
        reason: String,
    },

    /// The transport connected but the subscription was refused.
    #[error("{transport} subscription to {topic} failed: {reason}")]
    Subscribe {
        /// Transport name.
        transport: &'static str,
        /// Topic requested.
        topic: String,
        /// Underlying client error.
        reason: String,
    },

    /// `subscribe` was called before `connect`.
    #[error("{0} transport is not connected")]
    NotConnected(&'static str),

    /// HTTP client could not be built.
    #[error("http client setup failed: {0}")]
    Http(#[from] reqwest::Error),
}
