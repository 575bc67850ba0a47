//! Episode document model.
//!
//! A [`Document`] is one production package for an episode: an ordered list
//! of [`Scene`]s, each holding ordered [`Frame`]s, plus the other production
//! tabs (screenplay, breakdown, ...) kept as loosely shaped JSON sections.
//!
//! The store representation is camelCase JSON. Attributes the model does
//! not know about are carried through untouched in the flattened `extra` /
//! `sections` maps, so a round trip through this crate never drops data
//! written by other tools.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::types::{FrameId, SceneNumber, Timestamp};

// ---------------------------------------------------------------------------
// Tabs
// ---------------------------------------------------------------------------

/// The production tabs of an episode document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tab {
    Screenplay,
    Breakdown,
    Storyboard,
    ShotList,
    Budget,
    Casting,
    Marketing,
}

impl Tab {
    /// Every tab, in display order.
    pub const ALL: [Tab; 7] = [
        Tab::Screenplay,
        Tab::Breakdown,
        Tab::Storyboard,
        Tab::ShotList,
        Tab::Budget,
        Tab::Casting,
        Tab::Marketing,
    ];

    /// Key of the tab in the store document.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Screenplay => "screenplay",
            Self::Breakdown => "breakdown",
            Self::Storyboard => "storyboard",
            Self::ShotList => "shotList",
            Self::Budget => "budget",
            Self::Casting => "casting",
            Self::Marketing => "marketing",
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tab {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tab::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown tab '{s}'. Must be one of: {}",
                    Tab::ALL.map(Tab::as_str).join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// Review status of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    #[default]
    Draft,
    Final,
}

/// One storyboard frame, the unit of concurrent mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Stable identity, assigned at creation and never reused.
    pub id: FrameId,
    /// Display coordinate; not part of the frame's identity.
    pub scene_number: SceneNumber,
    /// Display coordinate; not part of the frame's identity.
    pub shot_number: u32,
    #[serde(default)]
    pub status: FrameStatus,
    /// Rendered image. Durable reference or absent once persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Attributes this model does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Frame {
    /// A draft frame with no image.
    pub fn new(id: impl Into<FrameId>, scene_number: SceneNumber, shot_number: u32) -> Self {
        Self {
            id: id.into(),
            scene_number,
            shot_number,
            status: FrameStatus::Draft,
            media_ref: None,
            description: None,
            prompt: None,
            extra: Map::new(),
        }
    }

    pub fn is_final(&self) -> bool {
        self.status == FrameStatus::Final
    }
}

/// Field-level update for a single frame. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FrameStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl FrameUpdate {
    /// Update carrying only a new media reference.
    pub fn media(media_ref: impl Into<String>) -> Self {
        Self {
            media_ref: Some(media_ref.into()),
            ..Default::default()
        }
    }

    /// A finished render: new media reference and `final` status.
    pub fn rendered(media_ref: impl Into<String>) -> Self {
        Self {
            media_ref: Some(media_ref.into()),
            status: Some(FrameStatus::Final),
            ..Default::default()
        }
    }
}

/// Incoming frame in a structural merge. Absent fields keep the base value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FramePatch {
    pub id: FrameId,
    #[serde(default)]
    pub scene_number: Option<SceneNumber>,
    #[serde(default)]
    pub shot_number: Option<u32>,
    #[serde(default)]
    pub status: Option<FrameStatus>,
    #[serde(default)]
    pub media_ref: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FramePatch {
    /// Patch that only names a frame.
    pub fn new(id: impl Into<FrameId>) -> Self {
        Self {
            id: id.into(),
            scene_number: None,
            shot_number: None,
            status: None,
            media_ref: None,
            description: None,
            prompt: None,
            extra: Map::new(),
        }
    }

    pub fn with_media(mut self, media_ref: impl Into<String>) -> Self {
        self.media_ref = Some(media_ref.into());
        self
    }

    /// Materialize a frame that did not exist in the base document.
    pub fn into_frame(self, scene_number: SceneNumber, default_shot: u32) -> Frame {
        Frame {
            id: self.id,
            scene_number: self.scene_number.unwrap_or(scene_number),
            shot_number: self.shot_number.unwrap_or(default_shot),
            status: self.status.unwrap_or_default(),
            media_ref: self.media_ref,
            description: self.description,
            prompt: self.prompt,
            extra: self
                .extra
                .into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect(),
        }
    }
}

impl From<Frame> for FramePatch {
    fn from(frame: Frame) -> Self {
        Self {
            id: frame.id,
            scene_number: Some(frame.scene_number),
            shot_number: Some(frame.shot_number),
            status: Some(frame.status),
            media_ref: frame.media_ref,
            description: frame.description,
            prompt: frame.prompt,
            extra: frame.extra,
        }
    }
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub scene_number: SceneNumber,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,
    #[serde(default)]
    pub frames: Vec<Frame>,
}

impl Scene {
    pub fn new(scene_number: SceneNumber) -> Self {
        Self {
            scene_number,
            heading: None,
            frames: Vec::new(),
        }
    }
}

/// Incoming scene in a structural merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenePatch {
    pub scene_number: SceneNumber,
    #[serde(default)]
    pub heading: Option<String>,
    #[serde(default)]
    pub frames: Vec<FramePatch>,
}

impl ScenePatch {
    pub fn new(scene_number: SceneNumber, frames: Vec<FramePatch>) -> Self {
        Self {
            scene_number,
            heading: None,
            frames,
        }
    }

    /// Parse storyboard tab data: either a bare scene array or an object
    /// with a `scenes` array.
    pub fn parse_many(value: Value) -> Result<Vec<ScenePatch>, CoreError> {
        let scenes = match value {
            Value::Array(_) => value,
            Value::Object(mut obj) => obj.remove("scenes").ok_or_else(|| {
                CoreError::Validation("storyboard data must contain a 'scenes' array".into())
            })?,
            other => {
                return Err(CoreError::Validation(format!(
                    "storyboard data must be an array or object, got {other}"
                )))
            }
        };
        Ok(serde_json::from_value(scenes)?)
    }
}

impl From<Scene> for ScenePatch {
    fn from(scene: Scene) -> Self {
        Self {
            scene_number: scene.scene_number,
            heading: scene.heading,
            frames: scene.frames.into_iter().map(FramePatch::from).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// One episode's production package.
///
/// `total_frames` and `finalized_frames` are derived values; they are
/// recomputed from `scenes` after every merge and never trusted on input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(default)]
    pub scenes: Vec<Scene>,
    #[serde(default)]
    pub total_frames: usize,
    #[serde(default)]
    pub finalized_frames: usize,
    #[serde(default)]
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    /// Non-storyboard tabs and any other top-level keys, by store key.
    #[serde(flatten)]
    pub sections: Map<String, Value>,
}

impl Default for Document {
    fn default() -> Self {
        Self::empty(None)
    }
}

impl Document {
    /// A document with no scenes and an epoch timestamp.
    pub fn empty(updated_by: Option<String>) -> Self {
        Self {
            scenes: Vec::new(),
            total_frames: 0,
            finalized_frames: 0,
            updated_at: Timestamp::default(),
            updated_by,
            sections: Map::new(),
        }
    }

    /// Build a document from scenes, with counters computed.
    pub fn with_scenes(scenes: Vec<Scene>) -> Self {
        let mut doc = Self::empty(None);
        doc.scenes = scenes;
        doc.recompute_counters();
        doc
    }

    /// Parse the store representation. Counters are recomputed.
    pub fn from_store_value(value: Value) -> Result<Self, CoreError> {
        let mut doc: Document = serde_json::from_value(value)?;
        doc.sections.remove(Tab::Storyboard.as_str());
        doc.recompute_counters();
        Ok(doc)
    }

    /// Serialize to the store representation.
    pub fn to_store_value(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.scenes.iter().flat_map(|s| s.frames.iter())
    }

    /// First frame with the given identifier, anywhere in the document.
    pub fn frame(&self, id: &str) -> Option<&Frame> {
        self.frames().find(|f| f.id == id)
    }

    /// `(scene index, frame index)` of the first frame with `id`.
    pub fn locate_frame(&self, id: &str) -> Option<(usize, usize)> {
        self.scenes.iter().enumerate().find_map(|(si, scene)| {
            scene
                .frames
                .iter()
                .position(|f| f.id == id)
                .map(|fi| (si, fi))
        })
    }

    pub fn scene(&self, scene_number: SceneNumber) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.scene_number == scene_number)
    }

    pub fn recompute_counters(&mut self) {
        self.total_frames = self.frames().count();
        self.finalized_frames = self.frames().filter(|f| f.is_final()).count();
    }

    /// Stamp the document as modified now by `editor`.
    ///
    /// The timestamp strictly increases even when the wall clock does not,
    /// so freshness comparisons against remote snapshots stay meaningful.
    pub fn touch(&mut self, editor: Option<&str>) {
        let now = chrono::Utc::now();
        let floor = self.updated_at + chrono::Duration::milliseconds(1);
        self.updated_at = now.max(floor);
        if let Some(editor) = editor {
            self.updated_by = Some(editor.to_string());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
