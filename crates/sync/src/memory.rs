//! In-process [`DocumentStore`] with fault injection.
//!
//! Keeps every version of every document so reads can be made to lag
//! behind writes, the way an eventually consistent store's read path does.
//! Used by the soak harness and by tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};

use crate::store::{DocumentPath, DocumentStore, SnapshotStream, StoreError};

/// Buffer per document for subscribers that fall behind.
const SUBSCRIBER_CAPACITY: usize = 256;

#[derive(Default)]
struct Entry {
    /// Oldest first. Never empty once the entry exists.
    versions: Vec<Value>,
    writes: usize,
}

#[derive(Default)]
struct Faults {
    failing_writes: VecDeque<StoreError>,
    lagging_reads: usize,
    write_latency: Option<Duration>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<DocumentPath, Entry>,
    channels: HashMap<DocumentPath, broadcast::Sender<Value>>,
    faults: Faults,
}

impl Inner {
    fn channel(&mut self, path: &DocumentPath) -> broadcast::Sender<Value> {
        self.channels
            .entry(path.clone())
            .or_insert_with(|| broadcast::channel(SUBSCRIBER_CAPACITY).0)
            .clone()
    }
}

/// Document store held entirely in memory.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` as the document without going through merge semantics
    /// or notifying subscribers.
    pub async fn seed(&self, path: &DocumentPath, value: Value) {
        let mut inner = self.inner.lock().await;
        inner.docs.entry(path.clone()).or_default().versions.push(value);
    }

    /// Latest version, ignoring any read faults.
    pub async fn current(&self, path: &DocumentPath) -> Option<Value> {
        let inner = self.inner.lock().await;
        inner.docs.get(path).and_then(|e| e.versions.last().cloned())
    }

    /// Number of successful writes to `path`.
    pub async fn write_count(&self, path: &DocumentPath) -> usize {
        let inner = self.inner.lock().await;
        inner.docs.get(path).map_or(0, |e| e.writes)
    }

    /// The next write fails with `error`. Calls queue up.
    pub async fn fail_next_write(&self, error: StoreError) {
        self.inner.lock().await.faults.failing_writes.push_back(error);
    }

    /// The next `count` reads return the version before the latest one
    /// (or nothing, if there is only one).
    pub async fn lag_next_reads(&self, count: usize) {
        self.inner.lock().await.faults.lagging_reads += count;
    }

    /// Delay applied inside every write before it takes effect.
    pub async fn set_write_latency(&self, latency: Option<Duration>) {
        self.inner.lock().await.faults.write_latency = latency;
    }

    /// Deliver `value` to subscribers of `path` as if the store had emitted
    /// it. The stored document is not changed.
    pub async fn emit(&self, path: &DocumentPath, value: Value) {
        let sender = self.inner.lock().await.channel(path);
        let _ = sender.send(value);
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn read(&self, path: &DocumentPath) -> Result<Option<Value>, StoreError> {
        let mut inner = self.inner.lock().await;
        let lagging = inner.faults.lagging_reads > 0;
        if lagging {
            inner.faults.lagging_reads -= 1;
        }

        let Some(entry) = inner.docs.get(path) else {
            return Ok(None);
        };
        let versions = &entry.versions;
        let value = if lagging {
            tracing::debug!(path = %path, "Serving lagging read");
            versions.len().checked_sub(2).map(|i| versions[i].clone())
        } else {
            versions.last().cloned()
        };
        Ok(value)
    }

    async fn write(&self, path: &DocumentPath, partial: &Value) -> Result<(), StoreError> {
        let Value::Object(incoming) = partial else {
            return Err(StoreError::Malformed(
                "document writes must be JSON objects".into(),
            ));
        };

        let latency = {
            let mut inner = self.inner.lock().await;
            if let Some(error) = inner.faults.failing_writes.pop_front() {
                return Err(error);
            }
            inner.faults.write_latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let mut inner = self.inner.lock().await;
        let entry = inner.docs.entry(path.clone()).or_default();
        let mut next = match entry.versions.last() {
            Some(Value::Object(existing)) => existing.clone(),
            _ => serde_json::Map::new(),
        };
        for (key, value) in incoming {
            next.insert(key.clone(), value.clone());
        }
        let next = Value::Object(next);
        entry.versions.push(next.clone());
        entry.writes += 1;

        let sender = inner.channel(path);
        let _ = sender.send(next);
        Ok(())
    }

    async fn subscribe(&self, path: &DocumentPath) -> Result<SnapshotStream, StoreError> {
        let (initial, rx) = {
            let mut inner = self.inner.lock().await;
            let rx = inner.channel(path).subscribe();
            let initial = inner.docs.get(path).and_then(|e| e.versions.last().cloned());
            (initial, rx)
        };

        let live = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(value) => return Some((value, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Snapshot subscriber lagged; dropping oldest");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(futures::stream::iter(initial).chain(live).boxed())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
