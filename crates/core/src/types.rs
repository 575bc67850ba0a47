/// Frame identifiers are opaque strings, unique within a document.
pub type FrameId = String;

/// Scene numbers are unique within a document.
pub type SceneNumber = u32;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Mint a fresh frame identifier. Identifiers are never reused.
pub fn new_frame_id() -> FrameId {
    uuid::Uuid::now_v7().to_string()
}
