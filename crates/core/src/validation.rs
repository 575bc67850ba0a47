//! Cleaning pass run on every document before it is persisted.
//!
//! Pure logic, no store access. Two things are removed:
//!
//! - explicit `null`s in loose attributes and tab sections, which the
//!   document store cannot encode;
//! - media references that are not durable. The frame itself is kept (it
//!   simply has no image) and a [`MediaRejection`] is recorded.

use serde::Serialize;
use serde_json::Value;

use crate::document::Document;
use crate::media::{preview, MediaKind, MediaPolicy};
use crate::types::{FrameId, SceneNumber};

/// A media reference dropped by the cleaning pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaRejection {
    pub frame_id: FrameId,
    pub scene_number: SceneNumber,
    pub kind: MediaKind,
    /// Truncated rendering of the rejected value.
    pub preview: String,
}

/// Output of [`clean_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct CleanReport {
    /// The document as it may be persisted.
    pub document: Document,
    pub rejections: Vec<MediaRejection>,
    /// Number of `null` values removed.
    pub nulls_dropped: usize,
}

impl CleanReport {
    pub fn is_clean(&self) -> bool {
        self.rejections.is_empty() && self.nulls_dropped == 0
    }
}

/// Remove `null` members from objects, recursing through objects and
/// arrays. Returns how many were removed.
pub fn strip_nulls(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => {
            let before = map.len();
            map.retain(|_, v| !v.is_null());
            let mut removed = before - map.len();
            for v in map.values_mut() {
                removed += strip_nulls(v);
            }
            removed
        }
        Value::Array(items) => items.iter_mut().map(strip_nulls).sum(),
        _ => 0,
    }
}

/// Produce the persistable form of `doc`.
pub fn clean_document(mut doc: Document, policy: &MediaPolicy) -> CleanReport {
    let mut rejections = Vec::new();
    let mut nulls_dropped = 0;

    for scene in &mut doc.scenes {
        for frame in &mut scene.frames {
            let before = frame.extra.len();
            frame.extra.retain(|_, v| !v.is_null());
            nulls_dropped += before - frame.extra.len();
            for v in frame.extra.values_mut() {
                nulls_dropped += strip_nulls(v);
            }

            let Some(media) = frame.media_ref.as_deref() else {
                continue;
            };
            let kind = policy.classify(media);
            if kind == MediaKind::Durable {
                continue;
            }

            tracing::warn!(
                frame_id = %frame.id,
                scene_number = scene.scene_number,
                kind = ?kind,
                "Dropped non-durable media reference before persist",
            );
            rejections.push(MediaRejection {
                frame_id: frame.id.clone(),
                scene_number: scene.scene_number,
                kind,
                preview: preview(media),
            });
            frame.media_ref = None;
        }
    }

    let before = doc.sections.len();
    doc.sections.retain(|_, v| !v.is_null());
    nulls_dropped += before - doc.sections.len();
    for v in doc.sections.values_mut() {
        nulls_dropped += strip_nulls(v);
    }

    doc.recompute_counters();

    CleanReport {
        document: doc,
        rejections,
        nulls_dropped,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
