//! # Client Statistics

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::AppState;

/// Broadcast connection statistics.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientStats {
    /// Open WebSocket sessions.
    pub active_connections: usize,
}

/// Build the stats router.
pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/stats/clients", get(client_stats))
}

/// GET /api/v1/stats/clients: Currently connected broadcast clients.
#[utoipa::path(
    get,
    path = "/api/v1/stats/clients",
    responses((status = 200, description = "Connection count", body = ClientStats)),
    tag = "stats"
)]
async fn client_stats(State(state): State<AppState>) -> Json<ClientStats> {
    Json(ClientStats {
        active_connections: state.hub.active_connections(),
    })
}
