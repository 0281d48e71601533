//! # Bundle Builder
//!
//! Resolves a binding set into the data needed to build a bundle, then
//! picks a strategy:
//!
//! - **standard**: a `.tar.gz` holding `data.json` and the raw policy
//!   sources under `policies/`;
//! - **compiled**: whatever the external compiler writes, returned verbatim.
//!
//! Ordering is fixed so identical catalog state yields identical archives:
//! bindings in resolution order, policies by id, entitlements and resource
//! types by id.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use pecp_core::catalog::NewBundle;
use pecp_core::{
    codes, validate_bundle_name, Binding, Bundle, Catalog, Entitlement, ErrorCategory,
    PlaneError, Policy, ResourceType,
};
use serde::{Deserialize, Serialize};

use crate::archive::{write_archive, ArchiveEntry};
use crate::compiler::{policy_filenames, validate_entrypoint, CompilerInvoker};

/// Directory policies are stored under inside a standard archive.
pub const POLICY_DIR: &str = "policies";

/// The `data.json` payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Bindings covered by the bundle.
    pub bindings: Vec<Binding>,
    /// Entitlements for the bindings' resource types.
    pub entitlements: Vec<Entitlement>,
    /// Metadata for the bindings' resource types.
    pub resource_types: Vec<ResourceType>,
}

/// Which bindings a build covers.
#[derive(Debug, Clone)]
pub enum BindingSelection {
    /// Every binding in the catalog.
    All,
    /// Bindings whose resource type is in the set. An empty set means all.
    ResourceTypes(BTreeSet<String>),
    /// The bindings listed by a persisted bundle, in its order.
    Explicit(Vec<pecp_core::BindingId>),
}

/// Everything a build needs, fetched from the catalog.
#[derive(Debug, Clone, Default)]
pub struct ResolvedBindings {
    /// Manifest contents.
    pub manifest: Manifest,
    /// Referenced policies, ascending id.
    pub policies: Vec<Policy>,
}

/// Build strategy that produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    /// Source archive.
    Standard,
    /// Compiler output.
    Compiled,
}

impl BuildKind {
    fn label(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Compiled => "compiled",
        }
    }
}

/// A finished bundle ready to serve.
#[derive(Debug, Clone)]
pub struct BuiltBundle {
    /// Artifact bytes, always gzip.
    pub bytes: Vec<u8>,
    /// Suggested download filename.
    pub filename: String,
    /// Strategy used.
    pub kind: BuildKind,
}

/// Builds bundles from catalog state.
#[derive(Clone)]
pub struct BundleBuilder {
    catalog: Arc<dyn Catalog>,
    compiler: CompilerInvoker,
}

impl std::fmt::Debug for BundleBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleBuilder")
            .field("compiler", &self.compiler)
            .finish_non_exhaustive()
    }
}

impl BundleBuilder {
    /// Create a builder over `catalog`.
    pub fn new(catalog: Arc<dyn Catalog>, compiler: CompilerInvoker) -> Self {
        Self { catalog, compiler }
    }

    /// Fetch bindings, policies, entitlements and resource types for `selection`.
    pub fn resolve(&self, selection: &BindingSelection) -> Result<ResolvedBindings, PlaneError> {
        let bindings = match selection {
            BindingSelection::All => self.catalog.bindings(),
            BindingSelection::ResourceTypes(keys) if keys.is_empty() => self.catalog.bindings(),
            BindingSelection::ResourceTypes(keys) => self.catalog.bindings_by_resource_types(keys),
            BindingSelection::Explicit(ids) => self.catalog.bindings_by_ids(ids)?,
        };

        let policy_ids: BTreeSet<_> = bindings
            .iter()
            .flat_map(|b| b.policy_ids.iter().copied())
            .collect();
        let resource_keys: BTreeSet<String> =
            bindings.iter().map(|b| b.resource_type.clone()).collect();

        let policies = self.catalog.policies_by_ids(&policy_ids);
        if policies.len() != policy_ids.len() {
            let found: BTreeSet<_> = policies.iter().map(|p| p.id).collect();
            let missing: Vec<_> = policy_ids.difference(&found).collect();
            tracing::warn!(?missing, "bindings reference policies that no longer exist");
        }

        Ok(ResolvedBindings {
            manifest: Manifest {
                entitlements: self.catalog.entitlements_for_resource_types(&resource_keys),
                resource_types: self.catalog.resource_types_by_keys(&resource_keys),
                bindings,
            },
            policies,
        })
    }

    /// Encode `resolved` as a standard source archive.
    pub fn build_standard(resolved: &ResolvedBindings) -> Result<Vec<u8>, PlaneError> {
        let names = policy_filenames(&resolved.policies, |p| p.name.clone())?;
        let entries: Vec<ArchiveEntry> = resolved
            .policies
            .iter()
            .zip(names)
            .map(|(policy, name)| {
                ArchiveEntry::new(format!("{POLICY_DIR}/{name}"), policy.content.as_bytes())
            })
            .collect();
        Ok(write_archive(&resolved.manifest, &entries)?)
    }

    /// Build an ad-hoc source archive over bindings filtered by resource type.
    pub fn build_dynamic(&self, resource_types: BTreeSet<String>) -> Result<BuiltBundle, PlaneError> {
        let resolved = self.resolve(&BindingSelection::ResourceTypes(resource_types))?;
        let bytes = Self::build_standard(&resolved).map_err(surface_as_technical)?;
        let filename = format!("bundle-{}.tar.gz", Utc::now().timestamp_millis());
        Ok(finish(bytes, filename, BuildKind::Standard))
    }

    /// Build a persisted bundle with the strategy it is configured for.
    pub async fn build_bundle(&self, bundle: &Bundle) -> Result<BuiltBundle, PlaneError> {
        let resolved = self.resolve(&BindingSelection::Explicit(bundle.binding_ids.clone()))?;
        let filename = format!("bundle-{}.tar.gz", bundle.id);

        if bundle.compile {
            let bytes = self
                .compiler
                .compile(&resolved.policies, &resolved.manifest, Some(&bundle.entrypoint))
                .await
                .map_err(surface_as_technical)?;
            Ok(finish(bytes, filename, BuildKind::Compiled))
        } else {
            let bytes = Self::build_standard(&resolved).map_err(surface_as_technical)?;
            Ok(finish(bytes, filename, BuildKind::Standard))
        }
    }

    /// Validate a bundle definition before it is persisted.
    ///
    /// Compiled bundles get a dry-run compile with an empty manifest. Any
    /// failure is reported as caller-correctable, since the definition is
    /// what needs fixing.
    pub async fn validate_definition(&self, draft: &NewBundle) -> Result<(), PlaneError> {
        validate_bundle_name(&draft.name)?;
        validate_entrypoint(draft.entrypoint_or_default())?;

        if !draft.compile {
            return Ok(());
        }

        let resolved = self.resolve(&BindingSelection::Explicit(draft.binding_ids.clone()))?;
        self.compiler
            .compile(
                &resolved.policies,
                &Manifest::default(),
                Some(draft.entrypoint_or_default()),
            )
            .await
            .map(|_| ())
            .map_err(|e| {
                tracing::info!(
                    bundle = %draft.name,
                    error = %e,
                    detail = ?e.detail(),
                    "bundle validation failed"
                );
                e.into_functional(codes::BUNDLE_VALIDATION_FAILED)
            })
    }
}

fn finish(bytes: Vec<u8>, filename: String, kind: BuildKind) -> BuiltBundle {
    metrics::counter!("pecp_bundle_builds_total", "kind" => kind.label()).increment(1);
    tracing::info!(%filename, kind = kind.label(), size = bytes.len(), "bundle built");
    BuiltBundle {
        bytes,
        filename,
        kind,
    }
}

// The caller has already committed to wanting this bundle, so build failures
// surface as infrastructure errors.
fn surface_as_technical(err: PlaneError) -> PlaneError {
    match err.category() {
        ErrorCategory::Technical => err,
        ErrorCategory::Functional => PlaneError::technical_with(
            codes::BUNDLE_GENERATION,
            "Error generating bundle",
            format!("{}: {err}", err.code()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::read_bundle;
    use crate::compiler::{CommandOutcome, CommandRunner, CommandSpec, CompilerConfig};
    use async_trait::async_trait;
    use pecp_core::catalog::{NewBinding, NewEntitlement, NewPolicy, NewResourceType};
    use pecp_core::{Effect, EvaluationMode, InMemoryCatalog, PolicyStatus, SubjectType};

    struct FixedRunner(CommandOutcome);

    #[async_trait]
    impl CommandRunner for FixedRunner {
        async fn run(&self, spec: &CommandSpec) -> std::io::Result<CommandOutcome> {
            if matches!(self.0, CommandOutcome::Success { .. }) {
                std::fs::write(spec.cwd.join("bundle.tar.gz"), b"compiled")?;
            }
            Ok(self.0.clone())
        }
    }

    fn builder_with(catalog: &InMemoryCatalog, outcome: CommandOutcome) -> BundleBuilder {
        let compiler = CompilerInvoker::with_runner(
            CompilerConfig::default(),
            Arc::new(FixedRunner(outcome)),
        );
        BundleBuilder::new(Arc::new(catalog.clone()), compiler)
    }

    fn ok() -> CommandOutcome {
        CommandOutcome::Success {
            output: String::new(),
        }
    }

    fn add_policy(catalog: &InMemoryCatalog, name: &str, content: &str) -> Policy {
        catalog
            .insert_policy(NewPolicy {
                name: name.into(),
                filename: None,
                content: content.into(),
                status: PolicyStatus::Active,
            })
            .unwrap()
    }

    fn add_binding(catalog: &InMemoryCatalog, rt: &str, policies: &[&Policy]) -> Binding {
        catalog
            .insert_binding(NewBinding {
                resource_type: rt.into(),
                context: "default".into(),
                policy_ids: policies.iter().map(|p| p.id).collect(),
                evaluation_mode: EvaluationMode::Direct,
            })
            .unwrap()
    }

    fn add_entitlement(catalog: &InMemoryCatalog, rt: &str) {
        catalog
            .insert_entitlement(NewEntitlement {
                resource_type: rt.into(),
                resource_ids: vec![],
                actions: vec!["read".into()],
                subject_type: SubjectType::Role,
                subject_id: "auditor".into(),
                effect: Effect::Allow,
            })
            .unwrap();
    }

    fn add_resource_type(catalog: &InMemoryCatalog, key: &str) {
        catalog
            .insert_resource_type(NewResourceType {
                name: format!("{key} service"),
                key: key.into(),
                description: String::new(),
                base_url: None,
                data_endpoint: None,
                metadata_endpoint: None,
                schema: None,
            })
            .unwrap();
    }

    fn bundle(catalog: &InMemoryCatalog, name: &str, compile: bool, bindings: &[&Binding]) -> Bundle {
        catalog
            .insert_bundle(NewBundle {
                name: name.into(),
                description: String::new(),
                compile,
                entrypoint: None,
                binding_ids: bindings.iter().map(|b| b.id).collect(),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn standard_archive_contains_exactly_the_referenced_data() {
        let catalog = InMemoryCatalog::new();
        add_resource_type(&catalog, "DOCUMENT");
        add_resource_type(&catalog, "LOAN");
        add_entitlement(&catalog, "DOCUMENT");
        add_entitlement(&catalog, "LOAN");
        let p1 = add_policy(&catalog, "doc", "package documents\nallow { true }\n");
        let p2 = add_policy(&catalog, "loan", "package loans");
        let k = add_binding(&catalog, "DOCUMENT", &[&p1]);
        add_binding(&catalog, "LOAN", &[&p2]);
        let finance = bundle(&catalog, "finance", false, &[&k]);

        let built = builder_with(&catalog, ok()).build_bundle(&finance).await.unwrap();
        assert_eq!(built.kind, BuildKind::Standard);
        assert_eq!(built.filename, format!("bundle-{}.tar.gz", finance.id));

        let (manifest, entries) = read_bundle(&built.bytes).unwrap();
        let manifest: Manifest = serde_json::from_value(manifest).unwrap();
        assert_eq!(manifest.bindings, vec![k]);
        assert_eq!(manifest.entitlements.len(), 1);
        assert_eq!(manifest.entitlements[0].resource_type, "DOCUMENT");
        assert_eq!(manifest.resource_types.len(), 1);
        assert_eq!(manifest.resource_types[0].key, "DOCUMENT");

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "policies/doc.rego");
        assert_eq!(entries[0].content, p1.content.as_bytes());
    }

    #[tokio::test]
    async fn manifest_uses_snake_case_top_level_keys() {
        let catalog = InMemoryCatalog::new();
        let built = builder_with(&catalog, ok())
            .build_dynamic(BTreeSet::new())
            .unwrap();
        let (manifest, entries) = read_bundle(&built.bytes).unwrap();
        assert_eq!(
            manifest,
            serde_json::json!({"bindings": [], "entitlements": [], "resource_types": []})
        );
        assert!(entries.is_empty());
        assert!(built.filename.starts_with("bundle-"));
        assert!(built.filename.ends_with(".tar.gz"));
    }

    #[tokio::test]
    async fn dynamic_build_filters_by_resource_type() {
        let catalog = InMemoryCatalog::new();
        let p1 = add_policy(&catalog, "doc", "package documents");
        let p2 = add_policy(&catalog, "loan", "package loans");
        add_binding(&catalog, "DOCUMENT", &[&p1]);
        let loan = add_binding(&catalog, "LOAN", &[&p2, &p1]);

        let built = builder_with(&catalog, ok())
            .build_dynamic(BTreeSet::from(["LOAN".to_string()]))
            .unwrap();
        let (manifest, entries) = read_bundle(&built.bytes).unwrap();
        let manifest: Manifest = serde_json::from_value(manifest).unwrap();
        assert_eq!(manifest.bindings, vec![loan]);
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["policies/doc.rego", "policies/loan.rego"]);
    }

    #[tokio::test]
    async fn compiled_bundle_returns_compiler_output_verbatim() {
        let catalog = InMemoryCatalog::new();
        let p1 = add_policy(&catalog, "doc", "package documents");
        let k = add_binding(&catalog, "DOCUMENT", &[&p1]);
        let wasm = bundle(&catalog, "wasm", true, &[&k]);

        let built = builder_with(&catalog, ok()).build_bundle(&wasm).await.unwrap();
        assert_eq!(built.kind, BuildKind::Compiled);
        assert_eq!(built.bytes, b"compiled");
    }

    #[tokio::test]
    async fn compile_failure_on_download_is_technical() {
        let catalog = InMemoryCatalog::new();
        let p1 = add_policy(&catalog, "doc", "package documents");
        let k = add_binding(&catalog, "DOCUMENT", &[&p1]);
        let wasm = bundle(&catalog, "wasm", true, &[&k]);

        let builder = builder_with(
            &catalog,
            CommandOutcome::Failure {
                exit_code: Some(1),
                output: "boom".into(),
            },
        );
        let err = builder.build_bundle(&wasm).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Technical);
    }

    #[tokio::test]
    async fn traversal_on_download_surfaces_as_technical() {
        let catalog = InMemoryCatalog::new();
        let p = catalog
            .insert_policy(NewPolicy {
                name: "evil".into(),
                filename: Some("../etc/passwd".into()),
                content: "package x".into(),
                status: PolicyStatus::Active,
            })
            .unwrap();
        let k = add_binding(&catalog, "DOCUMENT", &[&p]);
        let b = bundle(&catalog, "b", false, &[&k]);
        let err = builder_with(&catalog, ok()).build_bundle(&b).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Technical);
        assert!(err.detail().unwrap().contains("SEC_001"));
    }

    #[tokio::test]
    async fn validation_rewraps_compiler_failure_as_functional() {
        let catalog = InMemoryCatalog::new();
        let p1 = add_policy(&catalog, "doc", "package documents");
        let k = add_binding(&catalog, "DOCUMENT", &[&p1]);
        let builder = builder_with(
            &catalog,
            CommandOutcome::Failure {
                exit_code: Some(1),
                output: "rego_type_error".into(),
            },
        );
        let draft = NewBundle {
            name: "wasm".into(),
            description: String::new(),
            compile: true,
            entrypoint: None,
            binding_ids: vec![k.id],
        };
        let err = builder.validate_definition(&draft).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Functional);
        assert_eq!(err.code(), codes::BUNDLE_VALIDATION_FAILED);
        assert!(err.to_string().contains("rego_type_error"));
    }

    #[tokio::test]
    async fn validation_rejects_bad_entrypoint_without_compiling() {
        let catalog = InMemoryCatalog::new();
        let builder = builder_with(&catalog, ok());
        let draft = NewBundle {
            name: "b".into(),
            description: String::new(),
            compile: false,
            entrypoint: Some("allow me".into()),
            binding_ids: vec![],
        };
        let err = builder.validate_definition(&draft).await.unwrap_err();
        assert_eq!(err.code(), codes::INVALID_ENTRYPOINT);
    }

    #[tokio::test]
    async fn validation_rejects_names_unusable_in_urls() {
        let catalog = InMemoryCatalog::new();
        let builder = builder_with(&catalog, ok());
        for name in ["", "42", "a b", "a?b", "a/b"] {
            let draft = NewBundle {
                name: name.into(),
                description: String::new(),
                compile: false,
                entrypoint: None,
                binding_ids: vec![],
            };
            let err = builder.validate_definition(&draft).await.unwrap_err();
            assert_eq!(err.code(), codes::BUNDLE_VALIDATION_FAILED, "{name:?}");
        }
    }

    #[tokio::test]
    async fn validation_accepts_standard_bundle() {
        let catalog = InMemoryCatalog::new();
        let builder = builder_with(
            &catalog,
            CommandOutcome::Failure {
                exit_code: Some(1),
                output: String::new(),
            },
        );
        let draft = NewBundle {
            name: "plain".into(),
            description: String::new(),
            compile: false,
            entrypoint: None,
            binding_ids: vec![],
        };
        builder.validate_definition(&draft).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_binding_is_not_found() {
        let catalog = InMemoryCatalog::new();
        let builder = builder_with(&catalog, ok());
        let err = builder
            .resolve(&BindingSelection::Explicit(vec![pecp_core::BindingId::new(9)]))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn archive_covers_exactly_the_bound_policies(
                bound in proptest::collection::btree_set(0usize..6, 0..6),
                contents in proptest::collection::vec("[ -~]{0,64}", 6),
            ) {
                let catalog = InMemoryCatalog::new();
                let policies: Vec<Policy> = contents
                    .iter()
                    .enumerate()
                    .map(|(i, c)| add_policy(&catalog, &format!("p{i}"), c))
                    .collect();
                let bindings: Vec<Binding> = bound
                    .iter()
                    .map(|i| add_binding(&catalog, &format!("RT{i}"), &[&policies[*i]]))
                    .collect();

                let builder = builder_with(&catalog, ok());
                let selection = BindingSelection::Explicit(bindings.iter().map(|b| b.id).collect());
                let resolved = builder.resolve(&selection).unwrap();
                let bytes = BundleBuilder::build_standard(&resolved).unwrap();
                let (manifest, entries) = read_bundle(&bytes).unwrap();
                let manifest: Manifest = serde_json::from_value(manifest).unwrap();

                let ids: BTreeSet<_> = manifest.bindings.iter().flat_map(|b| b.policy_ids.clone()).collect();
                let expected: BTreeSet<_> = bound.iter().map(|i| policies[*i].id).collect();
                prop_assert_eq!(ids, expected);

                prop_assert_eq!(entries.len(), bound.len());
                for (entry, i) in entries.iter().zip(bound.iter()) {
                    prop_assert_eq!(&entry.path, &format!("policies/p{i}.rego"));
                    prop_assert_eq!(&entry.content, &contents[*i].as_bytes().to_vec());
                }
            }
        }
    }
}
