//! # Change Detector
//!
//! Maps a policy edit to the bundles that carry it:
//! policy → bindings that reference it → bundles that include those
//! bindings. One `bundle.update` event is enqueued per affected bundle.
//! Edits that leave the policy content untouched produce nothing.

use std::collections::BTreeSet;
use std::sync::Arc;

use pecp_core::event::DEFAULT_SOURCE;
use pecp_core::{Bundle, Catalog, ChangeEvent, PolicyChange};

use crate::dispatcher::NotificationDispatcher;

/// Reacts to catalog edits by notifying subscribers of affected bundles.
#[derive(Clone)]
pub struct ChangeDetector {
    catalog: Arc<dyn Catalog>,
    dispatcher: NotificationDispatcher,
    source: String,
    public_base_url: Option<String>,
}

impl std::fmt::Debug for ChangeDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeDetector")
            .field("source", &self.source)
            .field("public_base_url", &self.public_base_url)
            .finish_non_exhaustive()
    }
}

impl ChangeDetector {
    /// Detector stamping events with the default source.
    pub fn new(catalog: Arc<dyn Catalog>, dispatcher: NotificationDispatcher) -> Self {
        Self::with_source(catalog, dispatcher, DEFAULT_SOURCE)
    }

    /// Detector stamping events with `source`.
    pub fn with_source(
        catalog: Arc<dyn Catalog>,
        dispatcher: NotificationDispatcher,
        source: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            dispatcher,
            source: source.into(),
            public_base_url: None,
        }
    }

    /// Emit absolute download URLs under `base` instead of relative paths.
    pub fn with_public_base_url(mut self, base: Option<String>) -> Self {
        self.public_base_url = base
            .map(|b| b.trim_end_matches('/').to_string())
            .filter(|b| !b.is_empty());
        self
    }

    fn download_url(&self, bundle: &Bundle) -> String {
        match &self.public_base_url {
            Some(base) => format!("{base}{}", bundle.download_path()),
            None => bundle.download_path(),
        }
    }

    /// Handle a stored policy update. Returns how many events were enqueued.
    pub fn on_policy_updated(&self, change: &PolicyChange) -> usize {
        if !change.content_changed() {
            tracing::debug!(policy_id = %change.after.id, "policy content unchanged, no notification");
            return 0;
        }

        let policy_id = change.after.id;
        let bindings: BTreeSet<_> = self
            .catalog
            .bindings_referencing_policy(policy_id)
            .into_iter()
            .map(|b| b.id)
            .collect();
        if bindings.is_empty() {
            tracing::debug!(%policy_id, "policy not bound, no bundles affected");
            return 0;
        }

        let bundles = self.catalog.bundles_referencing_bindings(&bindings);
        let mut enqueued = 0;
        for bundle in &bundles {
            let event =
                ChangeEvent::bundle_update(&self.source, &bundle.name, self.download_url(bundle));
            if self.dispatcher.notify(bundle.topic(), event) {
                enqueued += 1;
            }
        }
        tracing::info!(
            %policy_id,
            bindings = bindings.len(),
            bundles = bundles.len(),
            enqueued,
            "policy change propagated"
        );
        enqueued
    }
}
