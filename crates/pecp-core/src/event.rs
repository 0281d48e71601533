//! # Change Event Envelope
//!
//! CloudEvents 1.0 structured-mode JSON. Every transport carries the exact
//! same bytes; only the delivery mechanism differs. Events are ephemeral:
//! there is no event log and no replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// CloudEvents spec version emitted.
pub const SPEC_VERSION: &str = "1.0";

/// Type tag of bundle change notifications.
pub const BUNDLE_UPDATE_TYPE: &str = "bundle.update";

/// Default `source` attribute identifying the control plane.
pub const DEFAULT_SOURCE: &str = "/policy-engine/control-plane";

/// Payload of a `bundle.update` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleUpdateData {
    /// Name of the bundle that changed.
    pub bundle_name: String,
    /// Opaque version token.
    pub version: String,
    /// Where to fetch the new bundle. Relative to the control plane when it
    /// starts with `/`.
    pub download_url: String,
}

/// Notification envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// CloudEvents spec version.
    pub specversion: String,
    /// Unique event id.
    pub id: String,
    /// URI identifying the emitting control plane.
    pub source: String,
    /// Event type tag.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Topic the event was published on, `bundles/<name>`.
    pub subject: String,
    /// Emission time.
    pub time: DateTime<Utc>,
    /// Media type of `data`.
    pub datacontenttype: String,
    /// Event payload.
    pub data: BundleUpdateData,
}

impl ChangeEvent {
    /// Build a `bundle.update` event for `bundle_name` with a fresh id and
    /// version token.
    pub fn bundle_update(source: &str, bundle_name: &str, download_url: String) -> Self {
        Self {
            specversion: SPEC_VERSION.to_string(),
            id: Uuid::new_v4().to_string(),
            source: source.to_string(),
            event_type: BUNDLE_UPDATE_TYPE.to_string(),
            subject: format!("bundles/{bundle_name}"),
            time: Utc::now(),
            datacontenttype: "application/json".to_string(),
            data: BundleUpdateData {
                bundle_name: bundle_name.to_string(),
                version: Uuid::new_v4().to_string(),
                download_url,
            },
        }
    }

    /// Serialize to the wire form shared by all transports.
    pub fn to_wire(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode the wire form.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_update_fills_envelope() {
        let event = ChangeEvent::bundle_update(
            DEFAULT_SOURCE,
            "finance",
            "/bundles/finance/download".into(),
        );
        assert_eq!(event.specversion, "1.0");
        assert_eq!(event.event_type, "bundle.update");
        assert_eq!(event.subject, "bundles/finance");
        assert_eq!(event.datacontenttype, "application/json");
        assert_eq!(event.data.bundle_name, "finance");
        assert_eq!(event.data.download_url, "/bundles/finance/download");
        assert_ne!(event.id, event.data.version);
    }

    #[test]
    fn wire_form_uses_cloudevents_attribute_names() {
        let event = ChangeEvent::bundle_update(DEFAULT_SOURCE, "hr", "/bundles/hr/download".into());
        let value: serde_json::Value = serde_json::from_slice(&event.to_wire().unwrap()).unwrap();
        assert_eq!(value["type"], "bundle.update");
        assert_eq!(value["source"], DEFAULT_SOURCE);
        assert_eq!(value["data"]["bundleName"], "hr");
        assert_eq!(value["data"]["downloadUrl"], "/bundles/hr/download");
        assert!(value["time"].is_string());
    }

    #[test]
    fn from_wire_rejects_garbage() {
        assert!(ChangeEvent::from_wire(b"not json").is_err());
    }

    #[test]
    fn events_get_unique_ids() {
        let a = ChangeEvent::bundle_update(DEFAULT_SOURCE, "a", "/bundles/a/download".into());
        let b = ChangeEvent::bundle_update(DEFAULT_SOURCE, "a", "/bundles/a/download".into());
        assert_ne!(a.id, b.id);
        assert_ne!(a.data.version, b.data.version);
    }
}
