//! Policy edits reach exactly the bundles that carry them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pecp_core::{
    Catalog, ChangeEvent, EvaluationMode, InMemoryCatalog, NewBinding, NewBundle, NewPolicy,
    PolicyStatus, PolicyUpdate,
};
use pecp_notify::{ChangeDetector, EventPublisher, NotificationDispatcher};
use tokio::sync::Mutex;

#[derive(Default)]
struct Recording {
    published: Mutex<Vec<(String, ChangeEvent)>>,
}

#[async_trait]
impl EventPublisher for Recording {
    fn transport(&self) -> &'static str {
        "recording"
    }

    async fn publish(&self, topic: &str, event: &ChangeEvent) {
        self.published
            .lock()
            .await
            .push((topic.to_string(), event.clone()));
    }
}

struct Fixture {
    catalog: Arc<InMemoryCatalog>,
    detector: ChangeDetector,
    recording: Arc<Recording>,
    consumer: tokio::task::JoinHandle<()>,
}

fn policy(name: &str, content: &str) -> NewPolicy {
    NewPolicy {
        name: name.into(),
        filename: None,
        content: content.into(),
        status: PolicyStatus::Active,
    }
}

fn fixture() -> Fixture {
    let catalog = Arc::new(InMemoryCatalog::new());
    let recording = Arc::new(Recording::default());
    let (dispatcher, consumer) =
        NotificationDispatcher::spawn(recording.clone(), 16, Duration::from_secs(1));
    let detector = ChangeDetector::new(catalog.clone(), dispatcher);
    Fixture {
        catalog,
        detector,
        recording,
        consumer,
    }
}

impl Fixture {
    async fn finish(self) -> Vec<(String, ChangeEvent)> {
        drop(self.detector);
        self.consumer.await.unwrap();
        let published = self.recording.published.lock().await;
        published.clone()
    }
}

#[tokio::test]
async fn editing_bound_policy_notifies_its_bundle_once() {
    let fx = fixture();
    let p1 = fx
        .catalog
        .insert_policy(policy("p1", "package finance\nallow = true"))
        .unwrap();
    let k = fx
        .catalog
        .insert_binding(NewBinding {
            resource_type: "DOCUMENT".into(),
            context: "default".into(),
            policy_ids: vec![p1.id],
            evaluation_mode: EvaluationMode::Direct,
        })
        .unwrap();
    fx.catalog
        .insert_bundle(NewBundle {
            name: "finance".into(),
            description: String::new(),
            compile: false,
            entrypoint: None,
            binding_ids: vec![k.id],
        })
        .unwrap();

    let change = fx
        .catalog
        .update_policy(
            p1.id,
            PolicyUpdate {
                content: Some("package finance\nallow = false".into()),
                ..PolicyUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(fx.detector.on_policy_updated(&change), 1);

    let published = fx.finish().await;
    assert_eq!(published.len(), 1);
    let (topic, event) = &published[0];
    assert_eq!(topic, "bundles/finance");
    assert_eq!(event.event_type, "bundle.update");
    assert_eq!(event.subject, "bundles/finance");
    assert_eq!(event.data.bundle_name, "finance");
    assert_eq!(event.data.download_url, "/bundles/finance/download");
}

#[tokio::test]
async fn unbound_or_unchanged_policy_notifies_nobody() {
    let fx = fixture();
    let lonely = fx.catalog.insert_policy(policy("lonely", "a")).unwrap();
    let change = fx
        .catalog
        .update_policy(
            lonely.id,
            PolicyUpdate {
                content: Some("b".into()),
                ..PolicyUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(fx.detector.on_policy_updated(&change), 0);

    let bound = fx.catalog.insert_policy(policy("bound", "x")).unwrap();
    let binding = fx
        .catalog
        .insert_binding(NewBinding {
            resource_type: "DOCUMENT".into(),
            context: "default".into(),
            policy_ids: vec![bound.id],
            evaluation_mode: EvaluationMode::Direct,
        })
        .unwrap();
    fx.catalog
        .insert_bundle(NewBundle {
            name: "docs".into(),
            description: String::new(),
            compile: false,
            entrypoint: None,
            binding_ids: vec![binding.id],
        })
        .unwrap();
    let rename_only = fx
        .catalog
        .update_policy(
            bound.id,
            PolicyUpdate {
                name: Some("renamed".into()),
                ..PolicyUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(fx.detector.on_policy_updated(&rename_only), 0);

    assert!(fx.finish().await.is_empty());
}

#[tokio::test]
async fn shared_binding_fans_out_to_every_bundle() {
    let fx = fixture();
    let shared = fx.catalog.insert_policy(policy("shared", "v1")).unwrap();
    let binding = fx
        .catalog
        .insert_binding(NewBinding {
            resource_type: "INVOICE".into(),
            context: "default".into(),
            policy_ids: vec![shared.id],
            evaluation_mode: EvaluationMode::Attribute,
        })
        .unwrap();
    for name in ["billing", "audit"] {
        fx.catalog
            .insert_bundle(NewBundle {
                name: name.into(),
                description: String::new(),
                compile: false,
                entrypoint: None,
                binding_ids: vec![binding.id],
            })
            .unwrap();
    }

    let change = fx
        .catalog
        .update_policy(
            shared.id,
            PolicyUpdate {
                content: Some("v2".into()),
                ..PolicyUpdate::default()
            },
        )
        .unwrap();
    assert_eq!(fx.detector.on_policy_updated(&change), 2);

    let mut topics: Vec<_> = fx.finish().await.into_iter().map(|(t, _)| t).collect();
    topics.sort();
    assert_eq!(topics, vec!["bundles/audit", "bundles/billing"]);
}
