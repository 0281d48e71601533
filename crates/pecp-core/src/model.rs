//! # Domain Records
//!
//! Snapshots of the records owned by the persistence layer. The build
//! pipeline treats each value as immutable for the duration of a build.
//!
//! All records serialize camelCase, which is the shape shipped inside a
//! bundle's `data.json` manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{codes, PlaneError};
use crate::identity::{BindingId, BundleId, EntitlementId, PolicyId, ResourceTypeId};

/// Entrypoint used when a bundle does not name one.
pub const DEFAULT_ENTRYPOINT: &str = "allow";

/// Lifecycle status of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    /// Included in builds and eligible for enforcement.
    #[default]
    Active,
    /// Retained but disabled.
    Inactive,
}

/// A single policy source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Catalog identifier.
    pub id: PolicyId,
    /// Display name.
    pub name: String,
    /// Declared filename. Sanitized to a basename before it touches disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Raw policy source text.
    #[serde(default)]
    pub content: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: PolicyStatus,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// How a binding's policies are evaluated against a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationMode {
    /// Evaluate the policies directly.
    #[default]
    Direct,
    /// Evaluate against resource attributes.
    Attribute,
    /// Evaluate as a filtering condition.
    Condition,
}

/// Association between a resource type + context and one or more policies.
///
/// Unique per `(resource_type, context)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
    /// Catalog identifier.
    pub id: BindingId,
    /// Resource-type key the binding applies to.
    pub resource_type: String,
    /// Free-form context string.
    #[serde(default)]
    pub context: String,
    /// Ordered list of bound policies. Never empty once persisted.
    pub policy_ids: Vec<PolicyId>,
    /// Evaluation mode tag.
    #[serde(default)]
    pub evaluation_mode: EvaluationMode,
}

/// A named, downloadable view over a set of bindings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    /// Catalog identifier.
    pub id: BundleId,
    /// Externally addressable name, used in topics and download URLs.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Whether downloads produce a compiled artifact instead of a source archive.
    #[serde(default)]
    pub compile: bool,
    /// Rule exposed by the compiled artifact.
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
    /// Ordered list of bindings. May be empty.
    #[serde(default)]
    pub binding_ids: Vec<BindingId>,
}

fn default_entrypoint() -> String {
    DEFAULT_ENTRYPOINT.to_string()
}

/// Check that `name` can address a bundle in topics and download URLs.
///
/// Names are limited to ASCII letters, digits, `.`, `_` and `-`. All-digit
/// names are rejected because the download routes also accept numeric ids.
/// `.` and `..` are rejected as path segments.
pub fn validate_bundle_name(name: &str) -> Result<(), PlaneError> {
    let reason = if name.is_empty() {
        "Bundle name cannot be empty"
    } else if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        "Bundle name may only contain letters, digits, '.', '_' and '-'"
    } else if name.chars().all(|c| c.is_ascii_digit()) {
        "Bundle name cannot be all digits"
    } else if name == "." || name == ".." {
        "Bundle name cannot be '.' or '..'"
    } else {
        return Ok(());
    };
    Err(PlaneError::functional(codes::BUNDLE_VALIDATION_FAILED, reason))
}

impl Bundle {
    /// Path, relative to the control plane base URL, that serves this bundle.
    pub fn download_path(&self) -> String {
        format!("/bundles/{}/download", self.name)
    }

    /// Notification topic for this bundle.
    pub fn topic(&self) -> String {
        format!("bundles/{}", self.name)
    }
}

/// Kind of principal an entitlement is granted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubjectType {
    /// A single user.
    User,
    /// A role.
    Role,
    /// A group of users.
    Group,
}

/// Grant or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    /// Grants the listed actions.
    Allow,
    /// Denies the listed actions.
    Deny,
}

/// A subject's allowed (or denied) actions on resources of one type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    /// Catalog identifier.
    pub id: EntitlementId,
    /// Resource-type key the entitlement scopes.
    pub resource_type: String,
    /// Specific resource identifiers; empty means every resource of the type.
    #[serde(default)]
    pub resource_ids: Vec<String>,
    /// Actions covered.
    #[serde(default)]
    pub actions: Vec<String>,
    /// Kind of subject.
    pub subject_type: SubjectType,
    /// Subject identifier.
    pub subject_id: String,
    /// Grant or deny.
    pub effect: Effect,
}

/// Metadata describing a protected resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceType {
    /// Catalog identifier.
    pub id: ResourceTypeId,
    /// Human-readable service name.
    pub name: String,
    /// Key referenced by bindings and entitlements.
    pub key: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Base URL of the owning service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Endpoint that serves resource data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_endpoint: Option<String>,
    /// Endpoint that serves resource metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_endpoint: Option<String>,
    /// Opaque filter schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundle_defaults_entrypoint_to_allow() {
        let bundle: Bundle = serde_json::from_str(r#"{"id": 1, "name": "finance"}"#).unwrap();
        assert_eq!(bundle.entrypoint, "allow");
        assert!(!bundle.compile);
        assert!(bundle.binding_ids.is_empty());
    }

    #[test]
    fn bundle_topic_and_download_path() {
        let bundle: Bundle = serde_json::from_str(r#"{"id": 1, "name": "finance"}"#).unwrap();
        assert_eq!(bundle.topic(), "bundles/finance");
        assert_eq!(bundle.download_path(), "/bundles/finance/download");
    }

    #[test]
    fn bundle_names_must_be_url_safe_and_not_numeric() {
        for ok in ["finance", "finance-wasm", "hr_v2", "v1.2", "3a"] {
            assert!(validate_bundle_name(ok).is_ok(), "{ok}");
        }
        for bad in ["", "3", "007", ".", "..", "a b", "a/b", "a?b", "a#b", "50%", "caf\u{e9}"] {
            let err = validate_bundle_name(bad).unwrap_err();
            assert_eq!(err.code(), codes::BUNDLE_VALIDATION_FAILED, "{bad:?}");
        }
    }

    #[test]
    fn binding_serializes_camel_case() {
        let binding = Binding {
            id: BindingId::new(3),
            resource_type: "DOCUMENT".into(),
            context: "default".into(),
            policy_ids: vec![PolicyId::new(1)],
            evaluation_mode: EvaluationMode::Direct,
        };
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["resourceType"], "DOCUMENT");
        assert_eq!(json["policyIds"], serde_json::json!([1]));
        assert_eq!(json["evaluationMode"], "DIRECT");
    }

    #[test]
    fn entitlement_enums_use_upper_case() {
        let json = r#"{
            "id": 1, "resourceType": "DOCUMENT", "subjectType": "ROLE",
            "subjectId": "auditor", "effect": "DENY"
        }"#;
        let ent: Entitlement = serde_json::from_str(json).unwrap();
        assert_eq!(ent.subject_type, SubjectType::Role);
        assert_eq!(ent.effect, Effect::Deny);
        assert!(ent.actions.is_empty());
    }
}
