//! # Entitlements and Resource Types
//!
//! Reference data packed into every bundle manifest.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use pecp_core::{Entitlement, NewEntitlement, NewResourceType, ResourceType};

use crate::error::AppError;
use crate::extractors::extract_validated_json;
use crate::state::AppState;

/// Build the reference-data router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/entitlements", get(list_entitlements).post(create_entitlement))
        .route(
            "/resource-types",
            get(list_resource_types).post(create_resource_type),
        )
}

/// GET /entitlements: List entitlements.
#[utoipa::path(
    get,
    path = "/entitlements",
    responses((status = 200, description = "All entitlements", body = serde_json::Value)),
    tag = "catalog"
)]
async fn list_entitlements(State(state): State<AppState>) -> Json<Vec<Entitlement>> {
    Json(state.catalog.entitlements())
}

/// POST /entitlements: Store an entitlement.
#[utoipa::path(
    post,
    path = "/entitlements",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Entitlement stored", body = serde_json::Value),
        (status = 400, description = "Invalid entitlement", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
async fn create_entitlement(
    State(state): State<AppState>,
    body: Result<Json<NewEntitlement>, JsonRejection>,
) -> Result<Json<Entitlement>, AppError> {
    let draft = extract_validated_json(body)?;
    Ok(Json(state.catalog.insert_entitlement(draft)?))
}

/// GET /resource-types: List resource types.
#[utoipa::path(
    get,
    path = "/resource-types",
    responses((status = 200, description = "All resource types", body = serde_json::Value)),
    tag = "catalog"
)]
async fn list_resource_types(State(state): State<AppState>) -> Json<Vec<ResourceType>> {
    Json(state.catalog.resource_types())
}

/// POST /resource-types: Register a resource type.
#[utoipa::path(
    post,
    path = "/resource-types",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Resource type stored", body = serde_json::Value),
        (status = 400, description = "Invalid resource type", body = crate::error::ErrorBody),
    ),
    tag = "catalog"
)]
async fn create_resource_type(
    State(state): State<AppState>,
    body: Result<Json<NewResourceType>, JsonRejection>,
) -> Result<Json<ResourceType>, AppError> {
    let draft = extract_validated_json(body)?;
    Ok(Json(state.catalog.insert_resource_type(draft)?))
}
