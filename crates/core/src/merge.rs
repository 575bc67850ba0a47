//! Merge and reconciliation of episode documents.
//!
//! Two paths produce a new document from a base (the staging copy):
//!
//! - [`apply_frame_update`] edits exactly one frame and leaves every other
//!   scene and frame untouched.
//! - [`merge_scenes`] / [`merge_snapshot`] walk the base scene by scene and
//!   overlay incoming frames by identity (structural merge).
//!
//! Both paths share the media rule in [`merge_media`]: a durable reference
//! is never replaced by an ephemeral payload or by nothing.

use std::collections::HashMap;

use serde_json::Value;

use crate::document::{
    Document, Frame, FramePatch, FrameStatus, FrameUpdate, Scene, ScenePatch, Tab,
};
use crate::error::CoreError;
use crate::media::MediaPolicy;
use crate::types::{FrameId, SceneNumber};

/// Result of a structural merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub document: Document,
    /// Frame identifiers that appeared more than once and were collapsed.
    pub collapsed: Vec<FrameId>,
}

// ---------------------------------------------------------------------------
// Field rules
// ---------------------------------------------------------------------------

/// Pick the media reference to keep when `incoming` meets `base`.
///
/// - incoming durable → incoming (newest committed state);
/// - base durable → base (incoming is absent or not durable);
/// - otherwise whichever is present, incoming first.
pub fn merge_media(
    base: Option<&str>,
    incoming: Option<&str>,
    policy: &MediaPolicy,
) -> Option<String> {
    if policy.holds_durable(incoming) {
        return incoming.map(str::to_string);
    }
    if policy.holds_durable(base) {
        return base.map(str::to_string);
    }
    incoming.or(base).map(str::to_string)
}

/// Overlay a patch onto an existing frame. Present incoming fields win.
fn overlay_frame(frame: &mut Frame, patch: FramePatch, policy: &MediaPolicy) {
    frame.media_ref = merge_media(frame.media_ref.as_deref(), patch.media_ref.as_deref(), policy);

    if let Some(scene_number) = patch.scene_number {
        frame.scene_number = scene_number;
    }
    if let Some(shot_number) = patch.shot_number {
        frame.shot_number = shot_number;
    }
    if let Some(status) = patch.status {
        frame.status = status;
    }
    if patch.description.is_some() {
        frame.description = patch.description;
    }
    if patch.prompt.is_some() {
        frame.prompt = patch.prompt;
    }
    for (key, value) in patch.extra {
        if !value.is_null() {
            frame.extra.insert(key, value);
        }
    }
}

// ---------------------------------------------------------------------------
// Single-frame path
// ---------------------------------------------------------------------------

/// Apply a field-level update to one frame of `base`.
///
/// Returns [`CoreError::FrameNotFound`] when no scene holds the frame; the
/// caller decides whether that is a skip or a hard error.
pub fn apply_frame_update(
    base: &Document,
    frame_id: &str,
    update: &FrameUpdate,
    policy: &MediaPolicy,
) -> Result<Document, CoreError> {
    let (si, fi) = base
        .locate_frame(frame_id)
        .ok_or_else(|| CoreError::FrameNotFound(frame_id.to_string()))?;

    let mut frame = base.scenes[si].frames[fi].clone();
    frame.media_ref = merge_media(frame.media_ref.as_deref(), update.media_ref.as_deref(), policy);
    if let Some(status) = update.status {
        frame.status = status;
    }
    if let Some(description) = &update.description {
        frame.description = Some(description.clone());
    }
    if let Some(prompt) = &update.prompt {
        frame.prompt = Some(prompt.clone());
    }

    let mut next = base.clone();
    next.scenes[si].frames[fi] = frame;
    next.recompute_counters();
    Ok(next)
}

// ---------------------------------------------------------------------------
// Structural path
// ---------------------------------------------------------------------------

/// Merge one scene's incoming frames onto its base frames.
///
/// Frames missing from this scene are taken from `relocated` (frames that
/// left another base scene) before being created from the patch.
fn merge_scene(
    base: &Scene,
    patch: ScenePatch,
    relocated: &mut HashMap<FrameId, Frame>,
    policy: &MediaPolicy,
) -> Scene {
    let mut frames = base.frames.clone();
    let mut index: HashMap<FrameId, usize> = HashMap::with_capacity(frames.len());
    for (i, frame) in frames.iter().enumerate() {
        index.entry(frame.id.clone()).or_insert(i);
    }

    for incoming in patch.frames {
        match index.get(&incoming.id) {
            Some(&i) => overlay_frame(&mut frames[i], incoming, policy),
            None => {
                let default_shot = frames.len() as u32 + 1;
                let frame = match relocated.remove(&incoming.id) {
                    Some(mut frame) => {
                        frame.scene_number = base.scene_number;
                        frame.shot_number = default_shot;
                        overlay_frame(&mut frame, incoming, policy);
                        frame
                    }
                    None => incoming.into_frame(base.scene_number, default_shot),
                };
                index.insert(frame.id.clone(), frames.len());
                frames.push(frame);
            }
        }
    }

    Scene {
        scene_number: base.scene_number,
        heading: patch.heading.or_else(|| base.heading.clone()),
        frames,
    }
}

/// Pull out of `scenes` every frame the incoming data lists only under
/// other scene numbers, keyed by identifier.
fn take_relocated(scenes: &mut [Scene], patches: &[ScenePatch]) -> HashMap<FrameId, Frame> {
    let mut listed: HashMap<&str, Vec<SceneNumber>> = HashMap::new();
    for patch in patches {
        for frame in &patch.frames {
            listed
                .entry(frame.id.as_str())
                .or_default()
                .push(patch.scene_number);
        }
    }

    let mut relocated: HashMap<FrameId, Frame> = HashMap::new();
    for scene in scenes.iter_mut() {
        let scene_number = scene.scene_number;
        scene.frames.retain(|frame| {
            let moves = listed
                .get(frame.id.as_str())
                .is_some_and(|targets| !targets.contains(&scene_number))
                && !relocated.contains_key(&frame.id);
            if moves {
                relocated.insert(frame.id.clone(), frame.clone());
            }
            !moves
        });
    }
    relocated
}

/// Fold repeated scene numbers in the incoming data into one patch each,
/// keeping first-seen order.
fn group_patches(incoming: Vec<ScenePatch>) -> Vec<ScenePatch> {
    let mut grouped: Vec<ScenePatch> = Vec::with_capacity(incoming.len());
    for patch in incoming {
        match grouped
            .iter_mut()
            .find(|g| g.scene_number == patch.scene_number)
        {
            Some(existing) => {
                if patch.heading.is_some() {
                    existing.heading = patch.heading;
                }
                existing.frames.extend(patch.frames);
            }
            None => grouped.push(patch),
        }
    }
    grouped
}

/// Collapse duplicate frame identifiers across the whole document, keeping
/// the first occurrence. A durable reference held only by a dropped copy is
/// folded into the kept frame. Returns the identifiers that were collapsed.
pub fn dedupe_frames(doc: &mut Document, policy: &MediaPolicy) -> Vec<FrameId> {
    let mut kept: HashMap<FrameId, (usize, usize)> = HashMap::new();
    let mut collapsed = Vec::new();

    for si in 0..doc.scenes.len() {
        let scene_number = doc.scenes[si].scene_number;
        let frames = std::mem::take(&mut doc.scenes[si].frames);
        for frame in frames {
            match kept.get(&frame.id) {
                Some(&(ki, kf)) => {
                    tracing::warn!(
                        frame_id = %frame.id,
                        scene_number,
                        "Collapsed duplicate frame identifier",
                    );
                    collapsed.push(frame.id.clone());
                    fold_duplicate(&mut doc.scenes[ki].frames[kf], frame, policy);
                }
                None => {
                    kept.insert(frame.id.clone(), (si, doc.scenes[si].frames.len()));
                    doc.scenes[si].frames.push(frame);
                }
            }
        }
    }

    collapsed
}

fn fold_duplicate(kept: &mut Frame, dropped: Frame, policy: &MediaPolicy) {
    if policy.holds_durable(kept.media_ref.as_deref())
        || !policy.holds_durable(dropped.media_ref.as_deref())
    {
        return;
    }
    kept.media_ref = dropped.media_ref.clone();
    if dropped.is_final() {
        kept.status = FrameStatus::Final;
    }
}

/// Structural merge of incoming scenes onto `base`.
///
/// Scenes in both are merged frame by frame; scenes only in `incoming` are
/// appended; scenes only in `base` are kept verbatim.
pub fn merge_scenes(base: &Document, incoming: Vec<ScenePatch>, policy: &MediaPolicy) -> MergeOutcome {
    let grouped = group_patches(incoming);
    let mut base_scenes = base.scenes.clone();
    let mut relocated = take_relocated(&mut base_scenes, &grouped);

    let mut pending: Vec<Option<ScenePatch>> = grouped.into_iter().map(Some).collect();
    let position: HashMap<SceneNumber, usize> = pending
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.as_ref().map(|p| (p.scene_number, i)))
        .collect();

    let mut scenes = Vec::with_capacity(base_scenes.len() + pending.len());
    for scene in &base_scenes {
        let patch = position
            .get(&scene.scene_number)
            .and_then(|&i| pending[i].take());
        match patch {
            Some(patch) => scenes.push(merge_scene(scene, patch, &mut relocated, policy)),
            None => scenes.push(scene.clone()),
        }
    }
    for patch in pending.into_iter().flatten() {
        let empty = Scene::new(patch.scene_number);
        scenes.push(merge_scene(&empty, patch, &mut relocated, policy));
    }

    let mut document = base.clone();
    document.scenes = scenes;
    let collapsed = dedupe_frames(&mut document, policy);
    document.recompute_counters();

    MergeOutcome {
        document,
        collapsed,
    }
}

/// Structural merge of a full remote snapshot onto `base`.
///
/// On top of [`merge_scenes`], the later timestamp wins and the snapshot's
/// non-storyboard sections overlay the base's key by key.
pub fn merge_snapshot(base: &Document, snapshot: &Document, policy: &MediaPolicy) -> MergeOutcome {
    let patches = snapshot.scenes.iter().cloned().map(ScenePatch::from).collect();
    let mut outcome = merge_scenes(base, patches, policy);

    let doc = &mut outcome.document;
    doc.updated_at = base.updated_at.max(snapshot.updated_at);
    if snapshot.updated_by.is_some() {
        doc.updated_by = snapshot.updated_by.clone();
    }
    for (key, value) in &snapshot.sections {
        if !value.is_null() {
            doc.sections.insert(key.clone(), value.clone());
        }
    }

    outcome
}

/// Merge whole-section data for a non-storyboard tab.
///
/// Objects are overlaid key by key (explicit `null`s are ignored); any
/// other shape replaces the section.
pub fn merge_section(base: &Document, tab: Tab, data: Value) -> Document {
    let mut next = base.clone();
    let key = tab.as_str().to_string();

    let data = match (next.sections.get_mut(&key), data) {
        (Some(Value::Object(existing)), Value::Object(incoming)) => {
            for (k, v) in incoming {
                if !v.is_null() {
                    existing.insert(k, v);
                }
            }
            return next;
        }
        (_, data) => data,
    };

    next.sections.insert(key, data);
    next
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    const DURABLE_A: &str = "https://storage.example.com/frames/a.png";
    const DURABLE_B: &str = "https://storage.example.com/frames/b.png";
    const INLINE: &str = "data:image/png;base64,iVBORw0KGgo=";

    fn policy() -> MediaPolicy {
        MediaPolicy::default()
    }

    fn base() -> Document {
        let mut s1 = Scene::new(1);
        s1.heading = Some("INT. KITCHEN - NIGHT".into());
        s1.frames.push(Frame::new("f1", 1, 1));
        s1.frames.push(Frame::new("f2", 1, 2));
        let mut s2 = Scene::new(2);
        s2.frames.push(Frame {
            media_ref: Some(DURABLE_A.into()),
            status: FrameStatus::Final,
            ..Frame::new("f3", 2, 1)
        });
        Document::with_scenes(vec![s1, s2])
    }

    // -- merge_media ---------------------------------------------------------

    #[test]
    fn durable_incoming_wins() {
        let got = merge_media(Some(DURABLE_A), Some(DURABLE_B), &policy());
        assert_eq!(got.as_deref(), Some(DURABLE_B));
    }

    #[test]
    fn absent_incoming_keeps_durable_base() {
        let got = merge_media(Some(DURABLE_A), None, &policy());
        assert_eq!(got.as_deref(), Some(DURABLE_A));
    }

    #[test]
    fn ephemeral_incoming_never_replaces_durable_base() {
        let got = merge_media(Some(DURABLE_A), Some(INLINE), &policy());
        assert_eq!(got.as_deref(), Some(DURABLE_A));
    }

    #[test]
    fn without_durable_values_incoming_is_preferred() {
        assert_eq!(merge_media(None, Some(INLINE), &policy()).as_deref(), Some(INLINE));
        assert_eq!(merge_media(Some(INLINE), None, &policy()).as_deref(), Some(INLINE));
        assert_eq!(merge_media(None, None, &policy()), None);
    }

    // -- apply_frame_update --------------------------------------------------

    #[test]
    fn frame_update_touches_only_the_target() {
        let base = base();
        let next =
            apply_frame_update(&base, "f2", &FrameUpdate::rendered(DURABLE_B), &policy()).unwrap();

        let f2 = next.frame("f2").unwrap();
        assert_eq!(f2.media_ref.as_deref(), Some(DURABLE_B));
        assert_eq!(f2.status, FrameStatus::Final);
        assert_eq!(next.frame("f1"), base.frame("f1"));
        assert_eq!(next.scenes[1], base.scenes[1]);
        assert_eq!(next.finalized_frames, 2);
        assert_eq!(next.total_frames, 3);
    }

    #[test]
    fn frame_update_for_unknown_frame_is_not_found() {
        let result = apply_frame_update(&base(), "ghost", &FrameUpdate::media(DURABLE_A), &policy());
        assert_matches!(result, Err(CoreError::FrameNotFound(id)) if id == "ghost");
    }

    #[test]
    fn frame_update_keeps_durable_against_inline_payload() {
        let next = apply_frame_update(&base(), "f3", &FrameUpdate::media(INLINE), &policy()).unwrap();
        assert_eq!(next.frame("f3").unwrap().media_ref.as_deref(), Some(DURABLE_A));
    }

    // -- merge_scenes --------------------------------------------------------

    #[test]
    fn untouched_scenes_are_preserved_verbatim() {
        let base = base();
        let incoming = vec![ScenePatch::new(2, vec![FramePatch::new("f3")])];
        let out = merge_scenes(&base, incoming, &policy());
        assert_eq!(out.document.scenes[0], base.scenes[0]);
        assert_eq!(out.document.frame("f3"), base.frame("f3"));
    }

    #[test]
    fn new_scenes_are_appended_and_new_frames_added() {
        let base = base();
        let incoming = vec![
            ScenePatch::new(1, vec![FramePatch::new("f9")]),
            ScenePatch::new(3, vec![FramePatch::new("g1"), FramePatch::new("g2")]),
        ];
        let out = merge_scenes(&base, incoming, &policy());
        let doc = out.document;

        assert_eq!(doc.scenes.len(), 3);
        assert_eq!(doc.scenes[2].scene_number, 3);
        assert_eq!(doc.scenes[0].frames.len(), 3);
        assert_eq!(doc.scenes[0].frames[2].shot_number, 3);
        assert_eq!(doc.scenes[2].frames[1].shot_number, 2);
        assert_eq!(doc.total_frames, 6);
        assert_eq!(doc.scenes[0].heading.as_deref(), Some("INT. KITCHEN - NIGHT"));
    }

    #[test]
    fn incoming_fields_win_when_present() {
        let mut patch = FramePatch::new("f1");
        patch.description = Some("Close on the kettle".into());
        patch.extra.insert("lens".into(), json!("85mm"));
        patch.extra.insert("ignored".into(), Value::Null);
        let out = merge_scenes(&base(), vec![ScenePatch::new(1, vec![patch])], &policy());

        let f1 = out.document.frame("f1").unwrap();
        assert_eq!(f1.description.as_deref(), Some("Close on the kettle"));
        assert_eq!(f1.extra["lens"], "85mm");
        assert!(!f1.extra.contains_key("ignored"));
        assert_eq!(f1.shot_number, 1);
    }

    #[test]
    fn structural_merge_keeps_durable_reference() {
        let incoming = vec![ScenePatch::new(2, vec![FramePatch::new("f3").with_media(INLINE)])];
        let out = merge_scenes(&base(), incoming, &policy());
        assert_eq!(out.document.frame("f3").unwrap().media_ref.as_deref(), Some(DURABLE_A));

        let cleared = vec![ScenePatch::new(2, vec![FramePatch::new("f3")])];
        let out = merge_scenes(&base(), cleared, &policy());
        assert_eq!(out.document.frame("f3").unwrap().media_ref.as_deref(), Some(DURABLE_A));
    }

    #[test]
    fn duplicate_incoming_frames_fold_into_one() {
        let incoming = vec![ScenePatch::new(
            3,
            vec![
                FramePatch::new("d1").with_media(DURABLE_A),
                FramePatch::new("d1"),
            ],
        )];
        let out = merge_scenes(&base(), incoming, &policy());
        let scene = out.document.scene(3).unwrap();
        assert_eq!(scene.frames.len(), 1);
        assert_eq!(scene.frames[0].media_ref.as_deref(), Some(DURABLE_A));
    }

    #[test]
    fn residual_duplicates_are_collapsed_keeping_first() {
        let mut base = base();
        let mut dup = Frame::new("f1", 2, 9);
        dup.description = Some("second copy".into());
        base.scenes[1].frames.push(dup);
        base.recompute_counters();

        let out = merge_scenes(&base, Vec::new(), &policy());
        assert_eq!(out.collapsed, vec!["f1".to_string()]);
        assert_eq!(out.document.total_frames, 3);
        assert_eq!(out.document.frame("f1").unwrap().shot_number, 1);
    }

    #[test]
    fn duplicate_collapse_is_idempotent() {
        let mut base = base();
        base.scenes[0].frames.push(Frame::new("f2", 1, 5));
        let incoming = vec![ScenePatch::new(1, vec![FramePatch::new("f2").with_media(DURABLE_B)])];

        let once = merge_scenes(&base, incoming.clone(), &policy()).document;
        let twice = merge_scenes(&once, incoming, &policy()).document;
        assert_eq!(once, twice);
    }

    #[test]
    fn frame_moved_to_another_scene_keeps_media_and_status() {
        let mut patch = FramePatch::new("f3");
        patch.scene_number = Some(1);
        patch.shot_number = Some(3);
        let incoming = vec![ScenePatch::new(
            1,
            vec![FramePatch::new("f1"), FramePatch::new("f2"), patch],
        )];
        let out = merge_scenes(&base(), incoming, &policy());
        let doc = out.document;

        assert!(out.collapsed.is_empty());
        assert_eq!(doc.scenes[0].frames.len(), 3);
        assert!(doc.scenes[1].frames.is_empty());
        let f3 = doc.frame("f3").unwrap();
        assert_eq!((f3.scene_number, f3.shot_number), (1, 3));
        assert_eq!(f3.media_ref.as_deref(), Some(DURABLE_A));
        assert_eq!(f3.status, FrameStatus::Final);
        assert_eq!(doc.finalized_frames, 1);
        assert_eq!(doc.total_frames, 3);
    }

    #[test]
    fn snapshot_moving_a_frame_keeps_durable_reference() {
        let base = base();
        let mut snap = base.clone();
        let mut moved = snap.scenes[1].frames.remove(0);
        moved.media_ref = None;
        moved.status = FrameStatus::Draft;
        moved.scene_number = 1;
        snap.scenes[0].frames.insert(0, moved);

        let doc = merge_snapshot(&base, &snap, &policy()).document;
        assert_eq!(doc.frame("f3").unwrap().media_ref.as_deref(), Some(DURABLE_A));
        assert_eq!(doc.total_frames, 3);
    }

    #[test]
    fn collapsed_duplicate_hands_over_durable_media() {
        let mut base = base();
        base.scenes[0].frames.push(Frame {
            media_ref: Some(DURABLE_B.into()),
            status: FrameStatus::Final,
            ..Frame::new("f1", 1, 9)
        });

        let out = merge_scenes(&base, Vec::new(), &policy());
        let f1 = out.document.frame("f1").unwrap();
        assert_eq!(out.collapsed, vec!["f1".to_string()]);
        assert_eq!(f1.shot_number, 1);
        assert_eq!(f1.media_ref.as_deref(), Some(DURABLE_B));
        assert_eq!(f1.status, FrameStatus::Final);
        assert_eq!(out.document.finalized_frames, 2);
    }

    #[test]
    fn repeated_scene_numbers_in_incoming_are_grouped() {
        let incoming = vec![
            ScenePatch::new(5, vec![FramePatch::new("x1")]),
            ScenePatch::new(5, vec![FramePatch::new("x2")]),
        ];
        let out = merge_scenes(&base(), incoming, &policy());
        assert_eq!(out.document.scenes.len(), 3);
        assert_eq!(out.document.scene(5).unwrap().frames.len(), 2);
    }

    // -- merge_snapshot ------------------------------------------------------

    #[test]
    fn snapshot_merge_takes_later_timestamp_and_sections() {
        let mut base = base();
        base.updated_at = "2026-03-01T10:00:00Z".parse().unwrap();
        let mut snap = base.clone();
        snap.updated_at = "2026-03-01T10:00:05Z".parse().unwrap();
        snap.sections.insert("budget".into(), json!({"total": 1200}));
        snap.scenes[0].frames.remove(0);

        let out = merge_snapshot(&base, &snap, &policy());
        assert_eq!(out.document.updated_at, snap.updated_at);
        assert_eq!(out.document.sections["budget"]["total"], 1200);
        // Frames missing from the snapshot are preserved.
        assert!(out.document.frame("f1").is_some());
    }

    // -- merge_section -------------------------------------------------------

    #[test]
    fn section_objects_overlay_key_by_key() {
        let mut base = base();
        base.sections.insert("budget".into(), json!({"total": 100, "currency": "USD"}));
        let next = merge_section(&base, Tab::Budget, json!({"total": 250, "currency": null}));
        assert_eq!(next.sections["budget"], json!({"total": 250, "currency": "USD"}));
    }

    #[test]
    fn section_non_objects_replace() {
        let next = merge_section(&base(), Tab::Screenplay, json!("FADE IN:"));
        assert_eq!(next.sections["screenplay"], "FADE IN:");
    }
}
