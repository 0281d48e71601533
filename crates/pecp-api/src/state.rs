//! # Application State
//!
//! Shared handles passed to every route handler. Every field is cheap to
//! clone; the catalog is behind an `Arc`, and the hub and dispatcher are
//! handles onto shared internals.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use pecp_bundle::{BundleBuilder, CompilerInvoker};
use pecp_core::Catalog;
use pecp_notify::{BroadcastHub, ChangeDetector, NotificationDispatcher};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Domain records.
    pub catalog: Arc<dyn Catalog>,
    /// Bundle build pipeline.
    pub builder: BundleBuilder,
    /// In-process broadcast hub behind `/ws`.
    pub hub: BroadcastHub,
    /// Turns policy edits into change notifications.
    pub detector: ChangeDetector,
    /// Prometheus exposition, absent when no recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("builder", &self.builder)
            .field("active_connections", &self.hub.active_connections())
            .field("detector", &self.detector)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wire the state from its parts.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        compiler: CompilerInvoker,
        hub: BroadcastHub,
        detector: ChangeDetector,
    ) -> Self {
        Self {
            builder: BundleBuilder::new(Arc::clone(&catalog), compiler),
            catalog,
            hub,
            detector,
            metrics: None,
        }
    }

    /// Convenience constructor building the detector from `dispatcher`.
    pub fn with_dispatcher(
        catalog: Arc<dyn Catalog>,
        compiler: CompilerInvoker,
        hub: BroadcastHub,
        dispatcher: NotificationDispatcher,
    ) -> Self {
        let detector = ChangeDetector::new(Arc::clone(&catalog), dispatcher);
        Self::new(catalog, compiler, hub, detector)
    }

    /// Attach a Prometheus handle for `/metrics`.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
