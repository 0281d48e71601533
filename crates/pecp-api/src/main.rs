//! # pecp-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for the control plane.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use pecp_api::config::LogFormat;
use pecp_api::{ApiConfig, AppState};
use pecp_bundle::CompilerInvoker;
use pecp_core::{CatalogSeed, InMemoryCatalog};
use pecp_notify::dispatcher::DEFAULT_SEND_TIMEOUT;
use pecp_notify::{build_publisher, BroadcastHub, ChangeDetector, NotificationDispatcher};

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::parse();
    init_tracing(config.log_format);
    tracing::info!(?config, "starting control plane");

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .context("installing Prometheus recorder")?;

    let catalog = Arc::new(InMemoryCatalog::new());
    if let Some(path) = &config.seed_file {
        let seed = CatalogSeed::from_path(path)
            .with_context(|| format!("reading catalog seed {}", path.display()))?;
        catalog
            .load(seed)
            .with_context(|| format!("loading catalog seed {}", path.display()))?;
        tracing::info!(path = %path.display(), "catalog seeded");
    }

    // Fail fast on transport misconfiguration, before binding the port.
    let transport = config.transport_config()?;
    let hub = BroadcastHub::new();
    let publisher = build_publisher(&transport, &hub).await?;
    let (dispatcher, consumer) =
        NotificationDispatcher::spawn(publisher, config.notify_queue, DEFAULT_SEND_TIMEOUT);

    let detector = ChangeDetector::with_source(catalog.clone(), dispatcher, config.source.clone())
        .with_public_base_url(config.public_base_url.clone());
    let compiler = CompilerInvoker::new(config.compiler_config());
    let state = AppState::new(catalog, compiler, hub, detector).with_metrics(prometheus);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("control plane listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    pecp_api::serve(
        listener,
        state,
        consumer,
        Duration::from_secs(config.shutdown_drain_secs),
        shutdown_signal(),
    )
    .await?;

    tracing::info!("control plane stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
