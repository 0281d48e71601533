//! # OpenAPI Specification Assembly
//!
//! Assembles the utoipa-documented routes into one OpenAPI document served
//! at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec for the control plane.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Policy Engine Control Plane",
        version = "0.1.0",
        description = "Policy bundle build and download, catalog management, and change notification statistics.",
        license(name = "AGPL-3.0-or-later")
    ),
    paths(
        // Bundles
        crate::routes::bundles::list_bundles,
        crate::routes::bundles::create_bundle,
        crate::routes::bundles::get_bundle,
        crate::routes::bundles::download_dynamic,
        crate::routes::bundles::download_bundle,
        // Policies
        crate::routes::policies::list_policies,
        crate::routes::policies::create_policy,
        crate::routes::policies::get_policy,
        crate::routes::policies::update_policy,
        // Bindings
        crate::routes::bindings::list_bindings,
        crate::routes::bindings::create_binding,
        crate::routes::bindings::get_binding,
        // Reference data
        crate::routes::catalog::list_entitlements,
        crate::routes::catalog::create_entitlement,
        crate::routes::catalog::list_resource_types,
        crate::routes::catalog::create_resource_type,
        // Stats
        crate::routes::stats::client_stats,
    ),
    components(schemas(
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        crate::routes::stats::ClientStats,
    )),
    tags(
        (name = "bundles", description = "Bundle definitions and downloads"),
        (name = "policies", description = "Policy source management"),
        (name = "bindings", description = "Policy to resource-type bindings"),
        (name = "catalog", description = "Entitlements and resource types"),
        (name = "stats", description = "Notification client statistics"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
