//! # Bindings

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use pecp_core::{codes, Binding, BindingId, NewBinding, PlaneError};

use crate::error::AppError;
use crate::extractors::extract_validated_json;
use crate::state::AppState;

/// Build the bindings router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bindings", get(list_bindings).post(create_binding))
        .route("/bindings/{id}", get(get_binding))
}

/// GET /bindings: List bindings.
#[utoipa::path(
    get,
    path = "/bindings",
    responses((status = 200, description = "All bindings", body = serde_json::Value)),
    tag = "bindings"
)]
async fn list_bindings(State(state): State<AppState>) -> Json<Vec<Binding>> {
    Json(state.catalog.bindings())
}

/// POST /bindings: Bind policies to a resource type.
#[utoipa::path(
    post,
    path = "/bindings",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Binding stored", body = serde_json::Value),
        (status = 400, description = "Invalid binding", body = crate::error::ErrorBody),
        (status = 409, description = "Duplicate resource type and context", body = crate::error::ErrorBody),
    ),
    tag = "bindings"
)]
async fn create_binding(
    State(state): State<AppState>,
    body: Result<Json<NewBinding>, JsonRejection>,
) -> Result<Json<Binding>, AppError> {
    let draft = extract_validated_json(body)?;
    let binding = state.catalog.insert_binding(draft)?;
    tracing::info!(binding_id = %binding.id, resource_type = %binding.resource_type, "binding created");
    Ok(Json(binding))
}

/// GET /bindings/{id}: Fetch one binding.
#[utoipa::path(
    get,
    path = "/bindings/{id}",
    params(("id" = i64, Path, description = "Binding id")),
    responses(
        (status = 200, description = "Binding found", body = serde_json::Value),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "bindings"
)]
async fn get_binding(
    State(state): State<AppState>,
    Path(id): Path<BindingId>,
) -> Result<Json<Binding>, AppError> {
    state.catalog.binding(id).map(Json).ok_or_else(|| {
        PlaneError::functional(codes::BINDING_NOT_FOUND, format!("Binding {id} not found")).into()
    })
}
