//! Remote snapshot handling.
//!
//! The store pushes full snapshots whenever the document changes, including
//! echoes of this process's own writes, which can arrive late or reflect an
//! older state. Each snapshot is queued on the write serializer like any
//! other mutation and either merged into the staging copy or ignored.

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use showrunner_core::merge::merge_snapshot;
use showrunner_core::{Document, FrameId, MediaPolicy};
use showrunner_events::SnapshotDecision;

use crate::engine::SyncEngine;
use crate::state::SyncState;

/// Decide what to do with a parsed snapshot and apply it if accepted.
///
/// A snapshot is ignored when it is not strictly newer than the staging
/// copy, or when it lacks a confirmed write that is still pending.
/// Otherwise it is merged structurally, which keeps durable media the
/// staging copy already holds.
pub fn reconcile(
    state: &mut SyncState,
    snapshot: Document,
    policy: &MediaPolicy,
    now: Instant,
) -> (SnapshotDecision, Option<FrameId>) {
    state.pending.prune(now);

    if let Some(cached) = state.cache.get() {
        if snapshot.updated_at <= cached.updated_at {
            return (SnapshotDecision::IgnoredStale, None);
        }
    }

    if let Some(marker) = state.pending.first_unreflected(&snapshot) {
        return (SnapshotDecision::IgnoredLagging, Some(marker.frame_id.clone()));
    }

    let merged = match state.cache.get() {
        Some(base) => merge_snapshot(base, &snapshot, policy).document,
        None => merge_snapshot(&Document::default(), &snapshot, policy).document,
    };
    state.cache.set(merged);
    (SnapshotDecision::Merged, None)
}

/// Drive the snapshot stream for `engine`'s document.
pub(crate) async fn run(engine: SyncEngine, cancel: CancellationToken) {
    let path = engine.path().clone();

    let mut stream = match engine.store().subscribe(&path).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Failed to subscribe to document");
            return;
        }
    };
    tracing::info!(path = %path, "Subscribed to document snapshots");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(path = %path, "Snapshot subscription cancelled");
                break;
            }
            next = stream.next() => match next {
                Some(value) => tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!(path = %path, "Snapshot subscription cancelled while queued");
                        break;
                    }
                    result = engine.apply_snapshot(value) => {
                        if let Err(e) = result {
                            tracing::warn!(path = %path, error = %e, "Snapshot step failed");
                        }
                    }
                },
                None => {
                    tracing::info!(path = %path, "Snapshot stream ended");
                    break;
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
