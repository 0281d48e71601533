//! # pecp-api: Policy Engine Control Plane
//!
//! Axum application serving bundle downloads, catalog management and the
//! broadcast notification endpoint.
//!
//! ## API Surface
//!
//! | Prefix                   | Module                  | Domain                     |
//! |--------------------------|-------------------------|----------------------------|
//! | `/bundles/*`             | [`routes::bundles`]     | Definitions and downloads  |
//! | `/policies/*`            | [`routes::policies`]    | Policy source              |
//! | `/bindings/*`            | [`routes::bindings`]    | Policy bindings            |
//! | `/entitlements`, `/resource-types` | [`routes::catalog`] | Reference data    |
//! | `/api/v1/stats/clients`  | [`routes::stats`]       | Broadcast connection count |
//! | `/ws`                    | [`routes::ws`]          | STOMP over WebSocket       |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → Handler
//! ```
//!
//! Health probes and `/metrics` sit outside the metrics middleware.

pub mod config;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

use std::future::Future;
use std::time::Duration;

use axum::middleware::from_fn;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub use config::ApiConfig;
pub use error::AppError;
pub use state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::bundles::router())
        .merge(routes::policies::router())
        .merge(routes::bindings::router())
        .merge(routes::catalog::router())
        .merge(routes::stats::router())
        .merge(routes::ws::router())
        .merge(openapi::router())
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(middleware::tracing_layer::layer())
        .with_state(state.clone());

    let ops = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(middleware::metrics::render))
        .with_state(state);

    Router::new().merge(ops).merge(api)
}

/// Serve `state` on `listener` until `shutdown` resolves.
///
/// In-flight requests finish first. The router, and with it the last
/// dispatcher handle, is then dropped so the notification consumer can drain
/// what is queued. Waiting on `consumer` is bounded by `drain_timeout`.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    consumer: JoinHandle<()>,
    drain_timeout: Duration,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("http server stopped, draining notifications");

    match tokio::time::timeout(drain_timeout, consumer).await {
        Ok(Ok(())) => tracing::info!("notification queue drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "notification consumer failed"),
        Err(_) => tracing::warn!(
            timeout_ms = drain_timeout.as_millis() as u64,
            "notification queue not drained before timeout"
        ),
    }
    Ok(())
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: returns 200 when the application is ready to serve.
async fn readiness() -> &'static str {
    "ready"
}
