//! Boundary to the remote document store.
//!
//! Documents cross this boundary as JSON. An absent member means "no
//! value"; the cleaning pass guarantees no `null` is ever written.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

/// Location of one document in the store, e.g. `episodes/ep-101`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentPath(String);

impl DocumentPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Path of an episode's production document.
    pub fn episode(episode_id: &str) -> Self {
        Self(format!("episodes/{episode_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Failures reported by a [`DocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The store rejected or returned a payload it could not handle.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Snapshots of one document, in the order the store emits them.
pub type SnapshotStream = BoxStream<'static, Value>;

/// A remote store holding whole documents.
///
/// Implementations must be shareable across tasks; the engine holds one
/// behind an `Arc<dyn DocumentStore>`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current value of the document, or `None` when it does not exist.
    async fn read(&self, path: &DocumentPath) -> Result<Option<Value>, StoreError>;

    /// Merge `partial` into the document: top-level members present in
    /// `partial` replace the stored ones, all others are kept. Creates the
    /// document when absent.
    async fn write(&self, path: &DocumentPath, partial: &Value) -> Result<(), StoreError>;

    /// Stream of full snapshots, starting with the current value when the
    /// document exists.
    async fn subscribe(&self, path: &DocumentPath) -> Result<SnapshotStream, StoreError>;
}
