//! # Catalog
//!
//! The persistence interface consumed by the build pipeline, the change
//! detector, and the HTTP layer. Relational storage is out of scope; the
//! shipped implementation is [`InMemoryCatalog`], optionally seeded from a
//! YAML document.
//!
//! All operations are synchronous. The lock is `parking_lot`, never held
//! across an `.await`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{codes, PlaneError};
use crate::identity::{BindingId, BundleId, EntitlementId, PolicyId, ResourceTypeId};
use crate::model::{
    validate_bundle_name, Binding, Bundle, Effect, Entitlement, EvaluationMode, Policy,
    PolicyStatus, ResourceType, SubjectType, DEFAULT_ENTRYPOINT,
};

// -- Drafts -------------------------------------------------------------------

/// A policy before the catalog assigns it an id.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPolicy {
    /// Display name.
    pub name: String,
    /// Declared filename.
    #[serde(default)]
    pub filename: Option<String>,
    /// Policy source text.
    #[serde(default)]
    pub content: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: PolicyStatus,
}

/// Partial update of a policy. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyUpdate {
    /// New display name.
    #[serde(default)]
    pub name: Option<String>,
    /// New declared filename.
    #[serde(default)]
    pub filename: Option<String>,
    /// New source text.
    #[serde(default)]
    pub content: Option<String>,
    /// New status.
    #[serde(default)]
    pub status: Option<PolicyStatus>,
}

/// Before/after snapshot of an updated policy.
#[derive(Debug, Clone)]
pub struct PolicyChange {
    /// State before the update.
    pub before: Policy,
    /// State after the update.
    pub after: Policy,
}

impl PolicyChange {
    /// Whether the policy source text changed.
    pub fn content_changed(&self) -> bool {
        self.before.content != self.after.content
    }
}

/// A binding before the catalog assigns it an id.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBinding {
    /// Resource-type key.
    pub resource_type: String,
    /// Context string.
    #[serde(default)]
    pub context: String,
    /// Bound policies.
    #[serde(default)]
    pub policy_ids: Vec<PolicyId>,
    /// Evaluation mode.
    #[serde(default)]
    pub evaluation_mode: EvaluationMode,
}

/// A bundle before the catalog assigns it an id.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBundle {
    /// Externally addressable name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Produce a compiled artifact on download.
    #[serde(default)]
    pub compile: bool,
    /// Compiled entrypoint.
    #[serde(default)]
    pub entrypoint: Option<String>,
    /// Bindings the bundle covers.
    #[serde(default)]
    pub binding_ids: Vec<BindingId>,
}

impl NewBundle {
    /// Entrypoint with the default applied.
    pub fn entrypoint_or_default(&self) -> &str {
        match self.entrypoint.as_deref().map(str::trim) {
            Some(e) if !e.is_empty() => e,
            _ => DEFAULT_ENTRYPOINT,
        }
    }
}

/// An entitlement before the catalog assigns it an id.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntitlement {
    /// Resource-type key.
    pub resource_type: String,
    /// Specific resource identifiers.
    #[serde(default)]
    pub resource_ids: Vec<String>,
    /// Actions covered.
    #[serde(default)]
    pub actions: Vec<String>,
    /// Subject kind.
    pub subject_type: SubjectType,
    /// Subject identifier.
    pub subject_id: String,
    /// Grant or deny.
    pub effect: Effect,
}

/// A resource type before the catalog assigns it an id.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResourceType {
    /// Service name.
    pub name: String,
    /// Key referenced by bindings.
    pub key: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Data endpoint.
    #[serde(default)]
    pub data_endpoint: Option<String>,
    /// Metadata endpoint.
    #[serde(default)]
    pub metadata_endpoint: Option<String>,
    /// Filter schema.
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
}

// -- Trait --------------------------------------------------------------------

/// Read/write access to the domain records.
///
/// List operations return records in ascending id order unless stated
/// otherwise.
pub trait Catalog: Send + Sync {
    /// All policies.
    fn policies(&self) -> Vec<Policy>;
    /// One policy.
    fn policy(&self, id: PolicyId) -> Option<Policy>;
    /// The policies among `ids` that exist, in ascending id order.
    fn policies_by_ids(&self, ids: &BTreeSet<PolicyId>) -> Vec<Policy>;
    /// Persist a new policy.
    fn insert_policy(&self, draft: NewPolicy) -> Result<Policy, PlaneError>;
    /// Apply a partial update and return the before/after pair.
    fn update_policy(&self, id: PolicyId, update: PolicyUpdate) -> Result<PolicyChange, PlaneError>;

    /// All bindings.
    fn bindings(&self) -> Vec<Binding>;
    /// One binding.
    fn binding(&self, id: BindingId) -> Option<Binding>;
    /// Bindings among `ids`, in the order given. Unknown ids are an error.
    fn bindings_by_ids(&self, ids: &[BindingId]) -> Result<Vec<Binding>, PlaneError>;
    /// Bindings whose resource type is one of `keys`.
    fn bindings_by_resource_types(&self, keys: &BTreeSet<String>) -> Vec<Binding>;
    /// Bindings that list `policy`.
    fn bindings_referencing_policy(&self, policy: PolicyId) -> Vec<Binding>;
    /// Persist a new binding after validating its policy references.
    fn insert_binding(&self, draft: NewBinding) -> Result<Binding, PlaneError>;

    /// All bundles.
    fn bundles(&self) -> Vec<Bundle>;
    /// One bundle by id.
    fn bundle(&self, id: BundleId) -> Option<Bundle>;
    /// One bundle by name.
    fn bundle_by_name(&self, name: &str) -> Option<Bundle>;
    /// Distinct bundles that list any of `bindings`.
    fn bundles_referencing_bindings(&self, bindings: &BTreeSet<BindingId>) -> Vec<Bundle>;
    /// Persist a new bundle.
    fn insert_bundle(&self, draft: NewBundle) -> Result<Bundle, PlaneError>;

    /// All entitlements.
    fn entitlements(&self) -> Vec<Entitlement>;
    /// Entitlements scoped to one of `keys`.
    fn entitlements_for_resource_types(&self, keys: &BTreeSet<String>) -> Vec<Entitlement>;
    /// Persist a new entitlement.
    fn insert_entitlement(&self, draft: NewEntitlement) -> Result<Entitlement, PlaneError>;

    /// All resource types.
    fn resource_types(&self) -> Vec<ResourceType>;
    /// Resource types whose key is one of `keys`.
    fn resource_types_by_keys(&self, keys: &BTreeSet<String>) -> Vec<ResourceType>;
    /// Persist a new resource type.
    fn insert_resource_type(&self, draft: NewResourceType) -> Result<ResourceType, PlaneError>;
}

// -- In-memory implementation -------------------------------------------------

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    policies: BTreeMap<PolicyId, Policy>,
    bindings: BTreeMap<BindingId, Binding>,
    bundles: BTreeMap<BundleId, Bundle>,
    entitlements: BTreeMap<EntitlementId, Entitlement>,
    resource_types: BTreeMap<ResourceTypeId, ResourceType>,
}

impl Tables {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Thread-safe, cloneable in-memory catalog.
///
/// Ids are allocated from one counter shared by every table, starting at 1.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog and load `seed` into it.
    pub fn from_seed(seed: CatalogSeed) -> Result<Self, PlaneError> {
        let catalog = Self::new();
        catalog.load(seed)?;
        Ok(catalog)
    }

    /// Insert every record of `seed`, in dependency order.
    pub fn load(&self, seed: CatalogSeed) -> Result<(), PlaneError> {
        for draft in seed.resource_types {
            self.insert_resource_type(draft)?;
        }
        for draft in seed.entitlements {
            self.insert_entitlement(draft)?;
        }
        for draft in seed.policies {
            self.insert_policy(draft)?;
        }
        for draft in seed.bindings {
            self.insert_binding(draft)?;
        }
        for draft in seed.bundles {
            self.insert_bundle(draft)?;
        }
        Ok(())
    }
}

/// Reject a blank policy name or a blank declared filename.
pub fn validate_policy_fields(name: &str, filename: Option<&str>) -> Result<(), PlaneError> {
    if name.trim().is_empty() {
        return Err(PlaneError::functional(
            codes::EMPTY_POLICY_NAME,
            "Policy name cannot be empty",
        ));
    }
    if let Some(f) = filename {
        if f.trim().is_empty() {
            return Err(PlaneError::functional(
                codes::EMPTY_FILENAME,
                "Filename cannot be empty",
            ));
        }
    }
    Ok(())
}

impl Catalog for InMemoryCatalog {
    fn policies(&self) -> Vec<Policy> {
        self.tables.read().policies.values().cloned().collect()
    }

    fn policy(&self, id: PolicyId) -> Option<Policy> {
        self.tables.read().policies.get(&id).cloned()
    }

    fn policies_by_ids(&self, ids: &BTreeSet<PolicyId>) -> Vec<Policy> {
        let tables = self.tables.read();
        ids.iter()
            .filter_map(|id| tables.policies.get(id).cloned())
            .collect()
    }

    fn insert_policy(&self, draft: NewPolicy) -> Result<Policy, PlaneError> {
        validate_policy_fields(&draft.name, draft.filename.as_deref())?;
        let mut tables = self.tables.write();
        let id = PolicyId::new(tables.allocate());
        let policy = Policy {
            id,
            name: draft.name,
            filename: draft.filename,
            content: draft.content,
            status: draft.status,
            updated_at: Utc::now(),
        };
        tables.policies.insert(id, policy.clone());
        Ok(policy)
    }

    fn update_policy(&self, id: PolicyId, update: PolicyUpdate) -> Result<PolicyChange, PlaneError> {
        let mut tables = self.tables.write();
        let current = tables.policies.get_mut(&id).ok_or_else(|| {
            PlaneError::functional(
                codes::POLICY_NOT_FOUND,
                format!("Policy not found with id: {id}"),
            )
        })?;

        let before = current.clone();
        let mut after = current.clone();
        if let Some(name) = update.name {
            after.name = name;
        }
        if let Some(filename) = update.filename {
            after.filename = Some(filename);
        }
        if let Some(content) = update.content {
            after.content = content;
        }
        if let Some(status) = update.status {
            after.status = status;
        }
        validate_policy_fields(&after.name, after.filename.as_deref())?;
        after.updated_at = Utc::now();

        *current = after.clone();
        Ok(PolicyChange { before, after })
    }

    fn bindings(&self) -> Vec<Binding> {
        self.tables.read().bindings.values().cloned().collect()
    }

    fn binding(&self, id: BindingId) -> Option<Binding> {
        self.tables.read().bindings.get(&id).cloned()
    }

    fn bindings_by_ids(&self, ids: &[BindingId]) -> Result<Vec<Binding>, PlaneError> {
        let tables = self.tables.read();
        ids.iter()
            .map(|id| {
                tables.bindings.get(id).cloned().ok_or_else(|| {
                    PlaneError::functional(
                        codes::BINDING_NOT_FOUND,
                        format!("Binding not found with id: {id}"),
                    )
                })
            })
            .collect()
    }

    fn bindings_by_resource_types(&self, keys: &BTreeSet<String>) -> Vec<Binding> {
        self.tables
            .read()
            .bindings
            .values()
            .filter(|b| keys.contains(&b.resource_type))
            .cloned()
            .collect()
    }

    fn bindings_referencing_policy(&self, policy: PolicyId) -> Vec<Binding> {
        self.tables
            .read()
            .bindings
            .values()
            .filter(|b| b.policy_ids.contains(&policy))
            .cloned()
            .collect()
    }

    fn insert_binding(&self, draft: NewBinding) -> Result<Binding, PlaneError> {
        if draft.policy_ids.is_empty() {
            return Err(PlaneError::functional(
                codes::BINDING_WITHOUT_POLICY,
                "At least one Policy ID is required",
            ));
        }

        let mut tables = self.tables.write();
        let missing: Vec<String> = draft
            .policy_ids
            .iter()
            .filter(|id| !tables.policies.contains_key(id))
            .map(ToString::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(PlaneError::functional(
                codes::BINDING_UNKNOWN_POLICY,
                format!("One or more policies not found: {}", missing.join(", ")),
            ));
        }
        if tables
            .bindings
            .values()
            .any(|b| b.resource_type == draft.resource_type && b.context == draft.context)
        {
            return Err(PlaneError::functional(
                codes::BINDING_DUPLICATE,
                format!(
                    "A binding for resource type {:?} and context {:?} already exists",
                    draft.resource_type, draft.context
                ),
            ));
        }

        let id = BindingId::new(tables.allocate());
        let binding = Binding {
            id,
            resource_type: draft.resource_type,
            context: draft.context,
            policy_ids: draft.policy_ids,
            evaluation_mode: draft.evaluation_mode,
        };
        tables.bindings.insert(id, binding.clone());
        Ok(binding)
    }

    fn bundles(&self) -> Vec<Bundle> {
        self.tables.read().bundles.values().cloned().collect()
    }

    fn bundle(&self, id: BundleId) -> Option<Bundle> {
        self.tables.read().bundles.get(&id).cloned()
    }

    fn bundle_by_name(&self, name: &str) -> Option<Bundle> {
        self.tables
            .read()
            .bundles
            .values()
            .find(|b| b.name == name)
            .cloned()
    }

    fn bundles_referencing_bindings(&self, bindings: &BTreeSet<BindingId>) -> Vec<Bundle> {
        self.tables
            .read()
            .bundles
            .values()
            .filter(|b| b.binding_ids.iter().any(|id| bindings.contains(id)))
            .cloned()
            .collect()
    }

    fn insert_bundle(&self, draft: NewBundle) -> Result<Bundle, PlaneError> {
        validate_bundle_name(&draft.name)?;
        let entrypoint = draft.entrypoint_or_default().to_string();
        let mut tables = self.tables.write();
        if tables.bundles.values().any(|b| b.name == draft.name) {
            return Err(PlaneError::functional(
                codes::BUNDLE_DUPLICATE,
                format!("A bundle named {:?} already exists", draft.name),
            ));
        }
        if let Some(missing) = draft
            .binding_ids
            .iter()
            .find(|id| !tables.bindings.contains_key(id))
        {
            return Err(PlaneError::functional(
                codes::BINDING_NOT_FOUND,
                format!("Binding not found with id: {missing}"),
            ));
        }

        let id = BundleId::new(tables.allocate());
        let bundle = Bundle {
            id,
            name: draft.name,
            description: draft.description,
            compile: draft.compile,
            entrypoint,
            binding_ids: draft.binding_ids,
        };
        tables.bundles.insert(id, bundle.clone());
        Ok(bundle)
    }

    fn entitlements(&self) -> Vec<Entitlement> {
        self.tables.read().entitlements.values().cloned().collect()
    }

    fn entitlements_for_resource_types(&self, keys: &BTreeSet<String>) -> Vec<Entitlement> {
        self.tables
            .read()
            .entitlements
            .values()
            .filter(|e| keys.contains(&e.resource_type))
            .cloned()
            .collect()
    }

    fn insert_entitlement(&self, draft: NewEntitlement) -> Result<Entitlement, PlaneError> {
        let mut tables = self.tables.write();
        let id = EntitlementId::new(tables.allocate());
        let entitlement = Entitlement {
            id,
            resource_type: draft.resource_type,
            resource_ids: draft.resource_ids,
            actions: draft.actions,
            subject_type: draft.subject_type,
            subject_id: draft.subject_id,
            effect: draft.effect,
        };
        tables.entitlements.insert(id, entitlement.clone());
        Ok(entitlement)
    }

    fn resource_types(&self) -> Vec<ResourceType> {
        self.tables.read().resource_types.values().cloned().collect()
    }

    fn resource_types_by_keys(&self, keys: &BTreeSet<String>) -> Vec<ResourceType> {
        self.tables
            .read()
            .resource_types
            .values()
            .filter(|r| keys.contains(&r.key))
            .cloned()
            .collect()
    }

    fn insert_resource_type(&self, draft: NewResourceType) -> Result<ResourceType, PlaneError> {
        let mut tables = self.tables.write();
        let id = ResourceTypeId::new(tables.allocate());
        let resource_type = ResourceType {
            id,
            name: draft.name,
            key: draft.key,
            description: draft.description,
            base_url: draft.base_url,
            data_endpoint: draft.data_endpoint,
            metadata_endpoint: draft.metadata_endpoint,
            schema: draft.schema,
        };
        tables.resource_types.insert(id, resource_type.clone());
        Ok(resource_type)
    }
}

// -- Seed ---------------------------------------------------------------------

/// Errors raised while loading a catalog seed file.
#[derive(Error, Debug)]
pub enum SeedError {
    /// The seed file could not be read.
    #[error("failed to read seed file {path}: {source}")]
    Io {
        /// Path of the seed file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The seed file is not valid YAML for a [`CatalogSeed`].
    #[error("failed to parse seed: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A seeded record failed catalog validation.
    #[error("invalid seed record: {0}")]
    Invalid(#[from] PlaneError),
}

/// Initial catalog contents.
///
/// Records are inserted resource types first, then entitlements, policies,
/// bindings, and bundles. Ids are assigned from one counter in that order,
/// so a seed can reference earlier records by their predictable ids.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSeed {
    /// Resource types.
    #[serde(default)]
    pub resource_types: Vec<NewResourceType>,
    /// Entitlements.
    #[serde(default)]
    pub entitlements: Vec<NewEntitlement>,
    /// Policies.
    #[serde(default)]
    pub policies: Vec<NewPolicy>,
    /// Bindings.
    #[serde(default)]
    pub bindings: Vec<NewBinding>,
    /// Bundles.
    #[serde(default)]
    pub bundles: Vec<NewBundle>,
}

impl CatalogSeed {
    /// Parse a seed from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, SeedError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read and parse a seed file.
    pub fn from_path(path: &Path) -> Result<Self, SeedError> {
        let text = std::fs::read_to_string(path).map_err(|source| SeedError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(name: &str, content: &str) -> NewPolicy {
        NewPolicy {
            name: name.into(),
            filename: None,
            content: content.into(),
            status: PolicyStatus::Active,
        }
    }

    fn binding(resource_type: &str, policy_ids: Vec<PolicyId>) -> NewBinding {
        NewBinding {
            resource_type: resource_type.into(),
            context: "default".into(),
            policy_ids,
            evaluation_mode: EvaluationMode::Direct,
        }
    }

    #[test]
    fn ids_are_assigned_sequentially() {
        let catalog = InMemoryCatalog::new();
        let a = catalog.insert_policy(policy("a", "")).unwrap();
        let b = catalog.insert_policy(policy("b", "")).unwrap();
        assert_eq!(a.id, PolicyId::new(1));
        assert_eq!(b.id, PolicyId::new(2));
    }

    #[test]
    fn empty_policy_name_is_rejected() {
        let catalog = InMemoryCatalog::new();
        let err = catalog.insert_policy(policy("  ", "")).unwrap_err();
        assert_eq!(err.code(), codes::EMPTY_POLICY_NAME);
    }

    #[test]
    fn update_policy_reports_content_change() {
        let catalog = InMemoryCatalog::new();
        let p = catalog.insert_policy(policy("p", "package a")).unwrap();

        let renamed = catalog
            .update_policy(
                p.id,
                PolicyUpdate {
                    name: Some("renamed".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!renamed.content_changed());

        let edited = catalog
            .update_policy(
                p.id,
                PolicyUpdate {
                    content: Some("package b".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(edited.content_changed());
        assert_eq!(catalog.policy(p.id).unwrap().content, "package b");
    }

    #[test]
    fn update_unknown_policy_is_not_found() {
        let catalog = InMemoryCatalog::new();
        let err = catalog
            .update_policy(PolicyId::new(99), PolicyUpdate::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn binding_requires_a_policy() {
        let catalog = InMemoryCatalog::new();
        let err = catalog.insert_binding(binding("DOCUMENT", vec![])).unwrap_err();
        assert_eq!(err.code(), codes::BINDING_WITHOUT_POLICY);
    }

    #[test]
    fn binding_rejects_unknown_policies() {
        let catalog = InMemoryCatalog::new();
        let err = catalog
            .insert_binding(binding("DOCUMENT", vec![PolicyId::new(5)]))
            .unwrap_err();
        assert_eq!(err.code(), codes::BINDING_UNKNOWN_POLICY);
    }

    #[test]
    fn binding_is_unique_per_resource_type_and_context() {
        let catalog = InMemoryCatalog::new();
        let p = catalog.insert_policy(policy("p", "")).unwrap();
        catalog.insert_binding(binding("DOCUMENT", vec![p.id])).unwrap();
        let err = catalog
            .insert_binding(binding("DOCUMENT", vec![p.id]))
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn reference_graph_queries() {
        let catalog = InMemoryCatalog::new();
        let p1 = catalog.insert_policy(policy("p1", "")).unwrap();
        let p2 = catalog.insert_policy(policy("p2", "")).unwrap();
        let k = catalog.insert_binding(binding("DOCUMENT", vec![p1.id])).unwrap();
        let l = catalog.insert_binding(binding("LOAN", vec![p2.id])).unwrap();
        let finance = catalog
            .insert_bundle(NewBundle {
                name: "finance".into(),
                description: String::new(),
                compile: false,
                entrypoint: None,
                binding_ids: vec![k.id, l.id],
            })
            .unwrap();
        assert_eq!(finance.entrypoint, "allow");

        let refs = catalog.bindings_referencing_policy(p1.id);
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].id, k.id);

        let bundles = catalog.bundles_referencing_bindings(&BTreeSet::from([k.id]));
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].name, "finance");

        let loans = catalog.bindings_by_resource_types(&BTreeSet::from(["LOAN".to_string()]));
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0].id, l.id);
    }

    #[test]
    fn bundle_rejects_duplicate_names_and_unknown_bindings() {
        let catalog = InMemoryCatalog::new();
        let draft = NewBundle {
            name: "finance".into(),
            description: String::new(),
            compile: false,
            entrypoint: None,
            binding_ids: vec![],
        };
        catalog.insert_bundle(draft.clone()).unwrap();
        assert!(catalog.insert_bundle(draft).unwrap_err().is_conflict());

        let err = catalog
            .insert_bundle(NewBundle {
                name: "other".into(),
                description: String::new(),
                compile: false,
                entrypoint: None,
                binding_ids: vec![BindingId::new(77)],
            })
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn numeric_bundle_name_is_rejected() {
        let catalog = InMemoryCatalog::new();
        let err = catalog
            .insert_bundle(NewBundle {
                name: "3".into(),
                description: String::new(),
                compile: false,
                entrypoint: None,
                binding_ids: vec![],
            })
            .unwrap_err();
        assert_eq!(err.code(), codes::BUNDLE_VALIDATION_FAILED);
        assert!(catalog.bundles().is_empty());
    }

    #[test]
    fn bindings_by_ids_preserves_order() {
        let catalog = InMemoryCatalog::new();
        let p = catalog.insert_policy(policy("p", "")).unwrap();
        let a = catalog.insert_binding(binding("A", vec![p.id])).unwrap();
        let b = catalog.insert_binding(binding("B", vec![p.id])).unwrap();
        let got = catalog.bindings_by_ids(&[b.id, a.id]).unwrap();
        assert_eq!(got[0].id, b.id);
        assert_eq!(got[1].id, a.id);
    }

    #[test]
    fn seed_loads_from_yaml() {
        let yaml = r#"
resourceTypes:
  - name: Document Service
    key: DOCUMENT
entitlements:
  - resourceType: DOCUMENT
    actions: [read]
    subjectType: ROLE
    subjectId: auditor
    effect: ALLOW
policies:
  - name: doc-read
    filename: doc_read.rego
    content: "package documents\n\ndefault allow = false\n"
bindings:
  - resourceType: DOCUMENT
    context: default
    policyIds: [3]
bundles:
  - name: finance
    bindingIds: [4]
"#;
        let seed = CatalogSeed::from_yaml_str(yaml).unwrap();
        let catalog = InMemoryCatalog::from_seed(seed).unwrap();
        let bundle = catalog.bundle_by_name("finance").unwrap();
        assert_eq!(bundle.id, BundleId::new(5));
        assert_eq!(bundle.binding_ids, vec![BindingId::new(4)]);
        assert_eq!(catalog.entitlements().len(), 1);
    }

    #[test]
    fn seed_with_dangling_reference_fails() {
        let yaml = "bindings:\n  - resourceType: DOCUMENT\n    policyIds: [42]\n";
        let seed = CatalogSeed::from_yaml_str(yaml).unwrap();
        assert!(InMemoryCatalog::from_seed(seed).is_err());
    }
}
