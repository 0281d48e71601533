#![deny(missing_docs)]

//! # pecp-core: Foundational Types for the Policy Engine Control Plane
//!
//! Every other crate in the workspace depends on this one. It has no internal
//! crate dependencies.
//!
//! ## Design Principles
//!
//! 1. **Newtype identifiers.** A [`PolicyId`] cannot be passed where a
//!    [`BindingId`] is expected.
//!
//! 2. **One error taxonomy.** [`PlaneError`] is either functional
//!    (caller-correctable, stable code, 4xx) or technical (infrastructure,
//!    5xx with a generic message). Callers decide presentation; the core
//!    only classifies.
//!
//! 3. **The [`Catalog`] is the persistence seam.** The build pipeline and the
//!    change detector read domain records exclusively through it.
//!
//! 4. **One wire envelope.** [`ChangeEvent`] serializes identically on every
//!    transport.

pub mod catalog;
pub mod error;
pub mod event;
pub mod identity;
pub mod model;
pub mod sanitize;
pub mod stomp;

// Re-export primary types at crate root for ergonomic imports.
pub use catalog::{
    Catalog, CatalogSeed, InMemoryCatalog, NewBinding, NewBundle, NewEntitlement, NewPolicy,
    NewResourceType, PolicyChange, PolicyUpdate, SeedError,
};
pub use catalog::validate_policy_fields;
pub use error::{codes, ErrorCategory, PlaneError};
pub use event::{BundleUpdateData, ChangeEvent};
pub use identity::{BindingId, BundleId, EntitlementId, PolicyId, ResourceTypeId};
pub use model::{
    Binding, Bundle, Effect, Entitlement, EvaluationMode, Policy, PolicyStatus, ResourceType,
    SubjectType, DEFAULT_ENTRYPOINT,
};
pub use model::validate_bundle_name;
pub use sanitize::{resolve_within, safe_policy_filename, POLICY_EXTENSION};
