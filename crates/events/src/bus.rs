//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`SyncEvent`]s. It is
//! designed to be shared via `Arc<EventBus>` between the sync engine, the
//! subscription adapter, and whatever surfaces progress to users.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use showrunner_core::validation::MediaRejection;
use showrunner_core::FrameId;

// ---------------------------------------------------------------------------
// SyncEvent
// ---------------------------------------------------------------------------

/// What happened to a remote snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotDecision {
    /// Structurally merged into the staging copy.
    Merged,
    /// Not newer than the staging copy.
    IgnoredStale,
    /// Missing a write that was just confirmed locally.
    IgnoredLagging,
    /// Could not be parsed.
    IgnoredMalformed,
}

/// A state change reported by the sync engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A frame update was persisted and read back.
    FrameConfirmed {
        path: String,
        frame_id: FrameId,
        media_ref: Option<String>,
        at: DateTime<Utc>,
    },

    /// A frame update named a frame the document does not have.
    FrameSkipped { path: String, frame_id: FrameId },

    /// The cleaning pass dropped a media reference.
    MediaRejected {
        path: String,
        rejection: MediaRejection,
    },

    /// The store refused a write.
    PersistFailed { path: String, error: String },

    /// A persisted frame did not read back as written.
    VerificationFailed {
        path: String,
        frame_id: FrameId,
        expected: Option<String>,
        found: Option<String>,
    },

    /// A remote snapshot was handled.
    Snapshot {
        path: String,
        decision: SnapshotDecision,
        /// Frame that made the snapshot look lagging, if any.
        frame_id: Option<FrameId>,
    },

    /// A unit of a bulk generation job finished.
    BatchProgress {
        path: String,
        total: usize,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
}

impl SyncEvent {
    /// Dot-separated event name, e.g. `"frame.confirmed"`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FrameConfirmed { .. } => "frame.confirmed",
            Self::FrameSkipped { .. } => "frame.skipped",
            Self::MediaRejected { .. } => "media.rejected",
            Self::PersistFailed { .. } => "persist.failed",
            Self::VerificationFailed { .. } => "verification.failed",
            Self::Snapshot { .. } => "snapshot.handled",
            Self::BatchProgress { .. } => "batch.progress",
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`SyncEvent`].
///
/// # Usage
///
/// ```rust
/// use showrunner_events::bus::{EventBus, SyncEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(SyncEvent::FrameSkipped {
///     path: "episodes/ep-101".into(),
///     frame_id: "f1".into(),
/// });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: SyncEvent) {
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
