//! # Bundles
//!
//! Bundle definitions and the two download endpoints: an ad-hoc archive
//! over bindings filtered by resource type, and a persisted bundle built
//! with its configured strategy.

use std::collections::BTreeSet;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::Query;
use pecp_bundle::BuiltBundle;
use pecp_core::{codes, Bundle, NewBundle, PlaneError};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::error::AppError;
use crate::extractors::extract_validated_json;
use crate::state::AppState;

/// Query for `GET /bundles/download`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct DownloadQuery {
    /// Resource-type keys. Repeatable; absent means every binding.
    #[serde(default)]
    pub resource_types: Vec<String>,
}

/// Build the bundles router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/bundles", get(list_bundles).post(create_bundle))
        .route("/bundles/download", get(download_dynamic))
        .route("/bundles/{id_or_name}", get(get_bundle))
        .route("/bundles/{id_or_name}/download", get(download_bundle))
}

/// Look a bundle up by name, falling back to its numeric id.
///
/// Names are never all digits, so a segment matches at most one bundle.
fn find_bundle(state: &AppState, id_or_name: &str) -> Result<Bundle, AppError> {
    state
        .catalog
        .bundle_by_name(id_or_name)
        .or_else(|| {
            id_or_name
                .parse()
                .ok()
                .and_then(|id| state.catalog.bundle(id))
        })
        .ok_or_else(|| {
            PlaneError::functional(
                codes::BUNDLE_NOT_FOUND,
                format!("Bundle {id_or_name} not found"),
            )
            .into()
        })
}

fn attachment(built: BuiltBundle) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/gzip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", built.filename),
            ),
        ],
        built.bytes,
    )
        .into_response()
}

/// GET /bundles: List bundle definitions.
#[utoipa::path(
    get,
    path = "/bundles",
    responses((status = 200, description = "All bundles", body = serde_json::Value)),
    tag = "bundles"
)]
async fn list_bundles(State(state): State<AppState>) -> Json<Vec<Bundle>> {
    Json(state.catalog.bundles())
}

/// POST /bundles: Validate and store a bundle definition.
///
/// Compiled bundles are dry-run compiled first; a definition that does not
/// compile is rejected with `FUNC_014`.
#[utoipa::path(
    post,
    path = "/bundles",
    request_body = serde_json::Value,
    responses(
        (status = 200, description = "Bundle stored", body = serde_json::Value),
        (status = 400, description = "Invalid definition", body = crate::error::ErrorBody),
        (status = 409, description = "Name taken", body = crate::error::ErrorBody),
    ),
    tag = "bundles"
)]
async fn create_bundle(
    State(state): State<AppState>,
    body: Result<Json<NewBundle>, JsonRejection>,
) -> Result<Json<Bundle>, AppError> {
    let draft = extract_validated_json(body)?;
    state.builder.validate_definition(&draft).await?;
    let bundle = state.catalog.insert_bundle(draft)?;
    tracing::info!(bundle = %bundle.name, id = %bundle.id, compile = bundle.compile, "bundle created");
    Ok(Json(bundle))
}

/// GET /bundles/{id_or_name}: Fetch one bundle definition.
#[utoipa::path(
    get,
    path = "/bundles/{id_or_name}",
    params(("id_or_name" = String, Path, description = "Bundle id or name")),
    responses(
        (status = 200, description = "Bundle found", body = serde_json::Value),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "bundles"
)]
async fn get_bundle(
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
) -> Result<Json<Bundle>, AppError> {
    find_bundle(&state, &id_or_name).map(Json)
}

/// GET /bundles/download: Archive of bindings filtered by resource type.
#[utoipa::path(
    get,
    path = "/bundles/download",
    params(DownloadQuery),
    responses(
        (status = 200, description = "Bundle archive", content_type = "application/gzip", body = Vec<u8>),
        (status = 500, description = "Build failed", body = crate::error::ErrorBody),
    ),
    tag = "bundles"
)]
async fn download_dynamic(
    State(state): State<AppState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let keys: BTreeSet<String> = query
        .resource_types
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    let built = state.builder.build_dynamic(keys)?;
    Ok(attachment(built))
}

/// GET /bundles/{id_or_name}/download: Build a persisted bundle.
#[utoipa::path(
    get,
    path = "/bundles/{id_or_name}/download",
    params(("id_or_name" = String, Path, description = "Bundle id or name")),
    responses(
        (status = 200, description = "Bundle artifact", content_type = "application/gzip", body = Vec<u8>),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 500, description = "Build failed", body = crate::error::ErrorBody),
    ),
    tag = "bundles"
)]
async fn download_bundle(
    State(state): State<AppState>,
    Path(id_or_name): Path<String>,
) -> Result<Response, AppError> {
    let bundle = find_bundle(&state, &id_or_name)?;
    let built = state.builder.build_bundle(&bundle).await?;
    Ok(attachment(built))
}
