//! Showrunner domain model and pure synchronization logic.
//!
//! Everything in this crate is synchronous and free of I/O so that the
//! sync engine, the worker, and tests can share the same document shapes,
//! merge rules and validation pass:
//!
//! - [`document`]: the episode document (scenes containing frames) and
//!   the production tabs around it.
//! - [`media`]: durable vs ephemeral media reference classification.
//! - [`merge`]: single-frame updates and structural merges.
//! - [`validation`]: the cleaning pass run before every persist.

pub mod document;
pub mod error;
pub mod media;
pub mod merge;
pub mod types;
pub mod validation;

pub use document::{Document, Frame, FramePatch, FrameStatus, FrameUpdate, Scene, ScenePatch, Tab};
pub use error::CoreError;
pub use media::{MediaKind, MediaPolicy};
pub use types::{FrameId, SceneNumber, Timestamp};
