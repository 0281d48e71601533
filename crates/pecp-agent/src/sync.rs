//! # Bundle Download and Apply
//!
//! The HTTP half of the agent. One shared `reqwest` client with a
//! per-request timeout performs both calls:
//!
//! - `GET <downloadUrl>` with the configured `Authorization` value, the URL
//!   resolved against the control plane when relative;
//! - `PUT <enforcement_url>/v1/policies/<bundle>` with the raw bytes.
//!
//! Neither call retries. The caller logs the failure and waits for the next
//! event.

use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use thiserror::Error;
use url::Url;

use crate::config::AgentConfig;
use crate::error::AgentError;

/// Content type of bundle archives.
pub const BUNDLE_CONTENT_TYPE: &str = "application/gzip";

/// Why one update could not be downloaded or applied.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The URL could not be built.
    #[error("invalid url {0:?}: {1}")]
    InvalidUrl(String, String),

    /// The request did not complete (connect, timeout, body read).
    #[error("request to {url} failed: {source}")]
    Request {
        /// Target URL.
        url: String,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-2xx status.
    #[error("{url} answered {status}")]
    Status {
        /// Target URL.
        url: String,
        /// Response status.
        status: StatusCode,
    },
}

/// Downloads bundles from the control plane and pushes them to the local
/// enforcement runtime.
#[derive(Clone)]
pub struct BundleSync {
    http: reqwest::Client,
    control_plane: Url,
    enforcement: Option<Url>,
    authorization: Option<HeaderValue>,
    auto_apply: bool,
}

impl std::fmt::Debug for BundleSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleSync")
            .field("control_plane", &self.control_plane.as_str())
            .field("enforcement", &self.enforcement.as_ref().map(Url::as_str))
            .field("authorization", &self.authorization.as_ref().map(|_| "[REDACTED]"))
            .field("auto_apply", &self.auto_apply)
            .finish()
    }
}

impl BundleSync {
    /// Build the client from a validated configuration.
    pub fn new(config: &AgentConfig) -> Result<Self, AgentError> {
        let authorization = config
            .auth_header
            .as_deref()
            .map(|raw| {
                let mut value = HeaderValue::from_str(raw).map_err(|_| {
                    AgentError::Config("auth_header contains invalid characters".into())
                })?;
                value.set_sensitive(true);
                Ok::<_, AgentError>(value)
            })
            .transpose()?;

        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;

        Ok(Self {
            http,
            control_plane: config.control_plane()?,
            enforcement: if config.auto_apply {
                Some(config.enforcement()?)
            } else {
                None
            },
            authorization,
            auto_apply: config.auto_apply,
        })
    }

    /// Whether downloaded bundles are pushed to the enforcement runtime.
    pub fn auto_apply(&self) -> bool {
        self.auto_apply
    }

    /// Absolute download URL. Relative values resolve against the control
    /// plane; absolute values pass through.
    pub fn resolve_download_url(&self, raw: &str) -> Result<Url, SyncError> {
        self.control_plane
            .join(raw)
            .map_err(|e| SyncError::InvalidUrl(raw.to_string(), e.to_string()))
    }

    /// Enforcement endpoint receiving `bundle_name`.
    pub fn apply_url(&self, bundle_name: &str) -> Result<Url, SyncError> {
        let base = self.enforcement.as_ref().ok_or_else(|| {
            SyncError::InvalidUrl(String::new(), "no enforcement endpoint configured".into())
        })?;
        let mut url = base.clone();
        url.path_segments_mut()
            .map_err(|()| SyncError::InvalidUrl(base.to_string(), "cannot be a base".into()))?
            .pop_if_empty()
            .extend(["v1", "policies", bundle_name]);
        Ok(url)
    }

    /// Fetch the bundle at `download_url`.
    pub async fn download(&self, download_url: &str) -> Result<Vec<u8>, SyncError> {
        let url = self.resolve_download_url(download_url)?;
        let mut request = self.http.get(url.clone());
        if let Some(auth) = &self.authorization {
            request = request.header(AUTHORIZATION, auth.clone());
        }
        let response = request.send().await.map_err(|source| SyncError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: url.to_string(),
                status,
            });
        }
        let body = response.bytes().await.map_err(|source| SyncError::Request {
            url: url.to_string(),
            source,
        })?;
        Ok(body.to_vec())
    }

    /// Push `bundle` to the enforcement runtime under `bundle_name`.
    pub async fn apply(&self, bundle_name: &str, bundle: Vec<u8>) -> Result<(), SyncError> {
        let url = self.apply_url(bundle_name)?;
        let response = self
            .http
            .put(url.clone())
            .header(CONTENT_TYPE, BUNDLE_CONTENT_TYPE)
            .body(bundle)
            .send()
            .await
            .map_err(|source| SyncError::Request {
                url: url.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: url.to_string(),
                status,
            });
        }
        Ok(())
    }
}
