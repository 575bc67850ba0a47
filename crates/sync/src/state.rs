//! State owned by the write serializer: the staging copy of the document
//! and the markers for writes that were confirmed but may not have
//! propagated to every reader yet.
//!
//! Nothing here is shared. The serializer worker holds the only
//! [`SyncState`] and hands `&mut` access to one step at a time.

use std::time::Duration;

use tokio::time::Instant;

use showrunner_core::{Document, FrameId};

// ---------------------------------------------------------------------------
// Staging cache
// ---------------------------------------------------------------------------

/// The most recent confirmed or merged version of the document.
#[derive(Debug, Default)]
pub struct StagingCache {
    document: Option<Document>,
}

impl StagingCache {
    pub fn get(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    pub fn set(&mut self, document: Document) {
        self.document = Some(document);
    }

    pub fn is_empty(&self) -> bool {
        self.document.is_none()
    }
}

// ---------------------------------------------------------------------------
// Pending writes
// ---------------------------------------------------------------------------

/// A confirmed write whose media reference every snapshot must reflect
/// until the marker expires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    pub frame_id: FrameId,
    pub media_ref: String,
    pub recorded_at: Instant,
}

/// Outstanding markers, pruned by age.
#[derive(Debug)]
pub struct PendingWrites {
    ttl: Duration,
    markers: Vec<PendingWrite>,
}

impl PendingWrites {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            markers: Vec::new(),
        }
    }

    /// Record a confirmed write. A newer write to the same frame replaces
    /// the older marker.
    pub fn mark(&mut self, frame_id: &str, media_ref: &str, now: Instant) {
        self.markers.retain(|m| m.frame_id != frame_id);
        self.markers.push(PendingWrite {
            frame_id: frame_id.to_string(),
            media_ref: media_ref.to_string(),
            recorded_at: now,
        });
    }

    /// Drop markers older than the TTL.
    pub fn prune(&mut self, now: Instant) {
        let ttl = self.ttl;
        let before = self.markers.len();
        self.markers
            .retain(|m| now.saturating_duration_since(m.recorded_at) < ttl);
        let expired = before - self.markers.len();
        if expired > 0 {
            tracing::debug!(expired, remaining = self.markers.len(), "Pruned pending write markers");
        }
    }

    /// First outstanding marker whose frame the snapshot lacks or holds with
    /// a different media reference.
    pub fn first_unreflected(&self, snapshot: &Document) -> Option<&PendingWrite> {
        self.markers.iter().find(|m| {
            snapshot
                .frame(&m.frame_id)
                .and_then(|f| f.media_ref.as_deref())
                != Some(m.media_ref.as_str())
        })
    }

    pub fn outstanding(&self) -> &[PendingWrite] {
        &self.markers
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

/// Everything the serializer worker owns.
#[derive(Debug)]
pub struct SyncState {
    pub cache: StagingCache,
    pub pending: PendingWrites,
}

impl SyncState {
    pub fn new(pending_write_ttl: Duration) -> Self {
        Self {
            cache: StagingCache::default(),
            pending: PendingWrites::new(pending_write_ttl),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
