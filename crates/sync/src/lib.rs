//! Concurrent synchronization of episode documents with a remote store.
//!
//! - [`SyncEngine`] serializes every mutation of one document through a
//!   single worker, verifies frame writes by reading them back, and
//!   reconciles remote snapshots against a staging copy.
//! - [`DocumentStore`] is the store boundary; [`InMemoryStore`] is an
//!   in-process implementation with fault injection.
//! - [`run_batch`] drives bulk frame generation on top of the engine.

pub mod batch;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod serializer;
pub mod state;
pub mod store;
pub mod subscription;
pub mod verify;

pub use batch::{
    run_batch, BatchHandle, BatchOptions, BatchProgress, BatchReport, FrameFailure, FrameRenderer,
    RenderError,
};
pub use config::{ConfigError, SyncConfig, UnknownFramePolicy};
pub use engine::{FrameOutcome, SyncEngine};
pub use error::SyncError;
pub use memory::InMemoryStore;
pub use serializer::{QueueHandle, WriteSerializer};
pub use store::{DocumentPath, DocumentStore, SnapshotStream, StoreError};
