//! # Policies
//!
//! Policy CRUD. An update that changes a policy's content triggers the
//! change detector once the new content is stored; notification delivery
//! happens off the request path.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use pecp_core::{codes, NewPolicy, PlaneError, Policy, PolicyId, PolicyUpdate};

use crate::error::AppError;
use crate::extractors::extract_validated_json;
use crate::state::AppState;

/// Build the policies router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/policies", get(list_policies).post(create_policy))
        .route("/policies/{id}", get(get_policy).put(update_policy))
}

/// GET /policies: List policies.
#[utoipa::path(
    get,
    path = "/policies",
    responses((status = 200, description = "All policies", body = serde_json::Value)),
    tag = "policies"
)]
async fn list_policies(State(state): State<AppState>) -> Json<Vec<Policy>> {
    Json(state.catalog.policies())
}

/// POST /policies: Store a new policy.
#[utoipa::path(
    post,
    path = "/policies",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Policy stored", body = serde_json::Value),
        (status = 400, description = "Invalid policy", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
async fn create_policy(
    State(state): State<AppState>,
    body: Result<Json<NewPolicy>, JsonRejection>,
) -> Result<Json<Policy>, AppError> {
    let draft = extract_validated_json(body)?;
    let policy = state.catalog.insert_policy(draft)?;
    tracing::info!(policy_id = %policy.id, name = %policy.name, "policy created");
    Ok(Json(policy))
}

/// GET /policies/{id}: Fetch one policy.
#[utoipa::path(
    get,
    path = "/policies/{id}",
    params(("id" = i64, Path, description = "Policy id")),
    responses(
        (status = 200, description = "Policy found", body = serde_json::Value),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
async fn get_policy(
    State(state): State<AppState>,
    Path(id): Path<PolicyId>,
) -> Result<Json<Policy>, AppError> {
    state.catalog.policy(id).map(Json).ok_or_else(|| {
        PlaneError::functional(codes::POLICY_NOT_FOUND, format!("Policy {id} not found")).into()
    })
}

/// PUT /policies/{id}: Update a policy and notify affected bundles.
#[utoipa::path(
    put,
    path = "/policies/{id}",
    params(("id" = i64, Path, description = "Policy id")),
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Policy updated", body = serde_json::Value),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "policies"
)]
async fn update_policy(
    State(state): State<AppState>,
    Path(id): Path<PolicyId>,
    body: Result<Json<PolicyUpdate>, JsonRejection>,
) -> Result<Json<Policy>, AppError> {
    let update = extract_validated_json(body)?;
    let change = state.catalog.update_policy(id, update)?;
    let notified = state.detector.on_policy_updated(&change);
    tracing::info!(policy_id = %id, notified, "policy updated");
    Ok(Json(change.after))
}
