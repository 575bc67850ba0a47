//! Showrunner sync event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`SyncEvent`]: what the sync engine reports as it confirms writes,
//!   rejects media, and reconciles remote snapshots.

pub mod bus;

pub use bus::{EventBus, SnapshotDecision, SyncEvent};
