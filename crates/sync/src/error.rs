use showrunner_core::{CoreError, FrameId};

use crate::store::StoreError;

/// Errors surfaced to callers of the sync engine.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The store refused the write. The staging copy was not advanced.
    #[error("Persist failed: {0}")]
    Persist(#[source] StoreError),

    /// A read against the store failed.
    #[error("Store read failed: {0}")]
    Read(#[source] StoreError),

    /// The write was accepted but the frame did not read back as written.
    #[error("Verification failed for frame {frame_id}: expected {expected:?}, found {found:?}")]
    Verification {
        frame_id: FrameId,
        expected: Option<String>,
        /// `None` when the frame or the document was missing from the read.
        found: Option<String>,
    },

    /// Frame update rejected under the strict unknown-frame policy.
    #[error("Unknown frame: {0}")]
    UnknownFrame(FrameId),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// The serializer worker is gone; nothing more can be queued.
    #[error("Write queue closed")]
    QueueClosed,

    /// A queued step panicked. The queue keeps running.
    #[error("Queued step panicked: {0}")]
    StepPanicked(String),

    /// The detached remainder of a batch did not run to completion.
    #[error("Batch aborted: {0}")]
    BatchAborted(String),
}
