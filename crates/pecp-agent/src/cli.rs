//! # Command Line
//!
//! Flags and `PECP_*` environment variables override the YAML file named by
//! `--config`. Without a file, `--control-plane-url` and `--bundle-name`
//! are required and everything else takes its default.

use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use pecp_notify::amqp::DEFAULT_EXCHANGE;
use pecp_notify::kafka::DEFAULT_TOPIC;
use pecp_notify::{redact_uri, ExchangeType, TransportKind};

use crate::config::{AgentConfig, TransportSettings};
use crate::error::AgentError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Policy bundle sync agent.
#[derive(Clone, Parser)]
#[command(name = "pecp-agent", version, about)]
pub struct Cli {
    /// YAML configuration file.
    #[arg(short, long, env = "PECP_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Control plane base URL.
    #[arg(long, env = "PECP_CONTROL_PLANE_URL")]
    pub control_plane_url: Option<String>,

    /// Bundle to track.
    #[arg(long, env = "PECP_BUNDLE_NAME")]
    pub bundle_name: Option<String>,

    /// Subscriber transport (broadcast, kafka, amqp).
    #[arg(long, env = "PECP_TRANSPORT")]
    pub transport: Option<TransportKind>,

    /// WebSocket endpoint for the broadcast transport.
    #[arg(long, env = "PECP_WS_URL")]
    pub ws_url: Option<String>,

    /// Comma-separated Kafka bootstrap brokers.
    #[arg(long, env = "PECP_KAFKA_BROKERS", value_delimiter = ',')]
    pub kafka_brokers: Vec<String>,

    /// Kafka topic carrying change events.
    #[arg(long, env = "PECP_KAFKA_TOPIC")]
    pub kafka_topic: Option<String>,

    /// Kafka consumer group.
    #[arg(long, env = "PECP_KAFKA_GROUP_ID")]
    pub kafka_group_id: Option<String>,

    /// AMQP broker URI.
    #[arg(long, env = "PECP_AMQP_URI", hide_env_values = true)]
    pub amqp_uri: Option<String>,

    /// AMQP exchange.
    #[arg(long, env = "PECP_AMQP_EXCHANGE")]
    pub amqp_exchange: Option<String>,

    /// AMQP exchange type.
    #[arg(long, env = "PECP_AMQP_EXCHANGE_KIND")]
    pub amqp_exchange_kind: Option<ExchangeType>,

    /// Enforcement runtime base URL.
    #[arg(long, env = "PECP_ENFORCEMENT_URL")]
    pub enforcement_url: Option<String>,

    /// `Authorization` header value sent on downloads.
    #[arg(long, env = "PECP_AUTH_HEADER", hide_env_values = true)]
    pub auth_header: Option<String>,

    /// Download bundles without pushing them to the enforcement runtime.
    #[arg(long)]
    pub no_auto_apply: bool,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "PECP_HTTP_TIMEOUT_SECS")]
    pub http_timeout_secs: Option<u64>,

    /// Enable verbose output. Repeat for more verbosity (-v, -vv).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log output format.
    #[arg(long, env = "PECP_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl std::fmt::Debug for Cli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cli")
            .field("config", &self.config)
            .field("control_plane_url", &self.control_plane_url)
            .field("bundle_name", &self.bundle_name)
            .field("transport", &self.transport)
            .field("amqp_uri", &self.amqp_uri.as_deref().map(redact_uri))
            .field("auth_header", &self.auth_header.as_ref().map(|_| "[REDACTED]"))
            .field("verbose", &self.verbose)
            .field("log_format", &self.log_format)
            .finish_non_exhaustive()
    }
}

impl Cli {
    /// Log filter implied by `-v` when `RUST_LOG` is unset.
    pub fn default_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Merge the file (if any) with flag overrides and validate the result.
    pub fn resolve(&self) -> Result<AgentConfig, AgentError> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::load(path)?,
            None => {
                let url = self.control_plane_url.clone().ok_or_else(|| {
                    AgentError::Config("--control-plane-url is required without --config".into())
                })?;
                let bundle = self.bundle_name.clone().ok_or_else(|| {
                    AgentError::Config("--bundle-name is required without --config".into())
                })?;
                AgentConfig::new(url, bundle)
            }
        };

        if let Some(url) = &self.control_plane_url {
            config.control_plane_url = url.clone();
        }
        if let Some(bundle) = &self.bundle_name {
            config.bundle_name = bundle.clone();
        }
        if let Some(url) = &self.enforcement_url {
            config.enforcement_url = url.clone();
        }
        if let Some(auth) = &self.auth_header {
            config.auth_header = Some(auth.clone());
        }
        if self.no_auto_apply {
            config.auto_apply = false;
        }
        if let Some(secs) = self.http_timeout_secs {
            config.http_timeout_secs = secs;
        }

        if let Some(kind) = self.transport {
            if kind != config.transport.kind() {
                config.transport = self.fresh_transport(kind)?;
            }
        }
        self.override_transport(&mut config.transport);

        config.validate()?;
        Ok(config)
    }

    /// Transport section built from flags alone.
    fn fresh_transport(&self, kind: TransportKind) -> Result<TransportSettings, AgentError> {
        Ok(match kind {
            TransportKind::Broadcast => TransportSettings::Broadcast { ws_url: None },
            TransportKind::Kafka => TransportSettings::Kafka {
                brokers: Vec::new(),
                topic: DEFAULT_TOPIC.to_string(),
                group_id: None,
            },
            TransportKind::Amqp => TransportSettings::Amqp {
                uri: self.amqp_uri.clone().ok_or_else(|| {
                    AgentError::Config("--amqp-uri is required for the amqp transport".into())
                })?,
                exchange: DEFAULT_EXCHANGE.to_string(),
                exchange_kind: ExchangeType::default(),
            },
        })
    }

    fn override_transport(&self, settings: &mut TransportSettings) {
        match settings {
            TransportSettings::Broadcast { ws_url } => {
                if let Some(url) = &self.ws_url {
                    *ws_url = Some(url.clone());
                }
            }
            TransportSettings::Kafka {
                brokers,
                topic,
                group_id,
            } => {
                if !self.kafka_brokers.is_empty() {
                    *brokers = self.kafka_brokers.clone();
                }
                if let Some(t) = &self.kafka_topic {
                    *topic = t.clone();
                }
                if let Some(g) = &self.kafka_group_id {
                    *group_id = Some(g.clone());
                }
            }
            TransportSettings::Amqp {
                uri,
                exchange,
                exchange_kind,
            } => {
                if let Some(u) = &self.amqp_uri {
                    *uri = u.clone();
                }
                if let Some(e) = &self.amqp_exchange {
                    *exchange = e.clone();
                }
                if let Some(k) = self.amqp_exchange_kind {
                    *exchange_kind = k;
                }
            }
        }
    }
}
