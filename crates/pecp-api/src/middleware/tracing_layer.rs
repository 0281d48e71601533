//! # Request/Response Tracing
//!
//! Configures `tower_http::trace::TraceLayer` so each request gets a span
//! with method, path and status.

use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Build the `TraceLayer` for the control plane.
pub fn layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http().on_response(DefaultOnResponse::new().level(Level::INFO))
}
