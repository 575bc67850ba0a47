#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use showrunner_events::{EventBus, SnapshotDecision, SyncEvent};
use showrunner_sync::{DocumentPath, DocumentStore, InMemoryStore, SyncConfig, SyncEngine};

pub const EDITOR: &str = "test-editor";

/// Build a `SyncConfig` with no verification pause, so tests run at the
/// speed of the in-memory store.
pub fn test_config() -> SyncConfig {
    SyncConfig {
        verify_delay: Duration::ZERO,
        pending_write_ttl: Duration::from_secs(5),
        queue_capacity: 64,
        editor: Some(EDITOR.to_string()),
        ..SyncConfig::default()
    }
}

/// Durable media reference for a frame.
pub fn media_url(frame_id: &str) -> String {
    format!("https://storage.example.com/frames/{frame_id}.png")
}

/// Storyboard tab data: one entry per scene, each listing frame ids.
pub fn storyboard(scenes: &[(u32, &[&str])]) -> Value {
    let scenes: Vec<Value> = scenes
        .iter()
        .map(|(scene_number, frames)| {
            let frames: Vec<Value> = frames
                .iter()
                .enumerate()
                .map(|(i, id)| {
                    json!({
                        "id": id,
                        "sceneNumber": scene_number,
                        "shotNumber": i + 1,
                        "description": format!("Shot {} of scene {scene_number}", i + 1),
                    })
                })
                .collect();
            json!({"sceneNumber": scene_number, "frames": frames})
        })
        .collect();
    json!({ "scenes": scenes })
}

/// Engine wired to an in-memory store and its own event bus.
pub struct Harness {
    pub path: DocumentPath,
    pub store: Arc<InMemoryStore>,
    pub events: Arc<EventBus>,
    pub engine: SyncEngine,
}

impl Harness {
    pub fn new(config: SyncConfig) -> Self {
        let path = DocumentPath::episode("ep-101");
        let store = Arc::new(InMemoryStore::new());
        let events = Arc::new(EventBus::default());
        let engine = SyncEngine::new(
            path.clone(),
            store.clone() as Arc<dyn DocumentStore>,
            config,
            events.clone(),
        );
        Self {
            path,
            store,
            events,
            engine,
        }
    }

    /// Harness whose document already holds the given storyboard.
    pub async fn seeded(config: SyncConfig, scenes: &[(u32, &[&str])]) -> Self {
        let harness = Self::new(config);
        harness
            .engine
            .update_tab(showrunner_core::Tab::Storyboard, storyboard(scenes))
            .await
            .expect("seeding the storyboard should succeed");
        harness
    }

    /// The stored document, parsed.
    pub async fn stored(&self) -> showrunner_core::Document {
        let value = self
            .store
            .current(&self.path)
            .await
            .expect("document should exist in the store");
        showrunner_core::Document::from_store_value(value).expect("stored document should parse")
    }

    /// The staging copy.
    pub async fn cached(&self) -> showrunner_core::Document {
        self.engine
            .snapshot()
            .await
            .expect("queue should be open")
            .expect("staging copy should be populated")
    }
}

/// Collect every event currently buffered on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Wait for the next snapshot decision published on `rx`.
pub async fn next_snapshot_decision(rx: &mut broadcast::Receiver<SyncEvent>) -> SnapshotDecision {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(SyncEvent::Snapshot { decision, .. }) => return decision,
                Ok(_) => continue,
                Err(e) => panic!("event bus closed: {e}"),
            }
        }
    })
    .await
    .expect("a snapshot should be handled within 5s")
}
