//! Bulk frame generation.
//!
//! [`run_batch`] renders many frames with bounded concurrency (one task per
//! frame, gated by a semaphore) and commits each result through the
//! engine's single-frame path. It returns as soon as `min_progress` frames
//! are confirmed (or every frame has finished), leaving the rest of the
//! batch running in the background. A render that yields no durable media
//! counts as a failure.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use showrunner_core::media::preview;
use showrunner_core::{Frame, FrameId, FrameUpdate, MediaKind};
use showrunner_events::SyncEvent;

use crate::engine::{FrameOutcome, SyncEngine};
use crate::error::SyncError;
use crate::serializer::panic_message;

/// Default number of frames rendered at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Failure reported by a renderer, e.g. a non-success response from an
/// image generation service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("render failed with status {status}: {message}")]
pub struct RenderError {
    pub status: u16,
    pub message: String,
}

/// Produces a durable media reference for a frame.
#[async_trait]
pub trait FrameRenderer: Send + Sync {
    async fn render(&self, frame: &Frame) -> Result<String, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Confirmed frames required before [`run_batch`] returns.
    pub min_progress: usize,
    /// Frames in flight at once. Zero is treated as one.
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            min_progress: 1,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// Counts over one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl BatchProgress {
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    pub fn is_complete(&self) -> bool {
        self.finished() >= self.total
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFailure {
    pub frame_id: FrameId,
    pub error: String,
}

/// Final state of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub progress: BatchProgress,
    pub failures: Vec<FrameFailure>,
}

/// Returned by [`run_batch`] once the progress threshold is met.
pub struct BatchHandle {
    /// Progress at the moment the threshold was met.
    pub progress: BatchProgress,
    remainder: JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Wait for the rest of the batch.
    pub async fn finish(self) -> Result<BatchReport, SyncError> {
        self.remainder
            .await
            .map_err(|e| SyncError::BatchAborted(e.to_string()))
    }

    /// Stop the remainder. Frames already confirmed stay confirmed.
    pub fn abort(&self) {
        self.remainder.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.remainder.is_finished()
    }
}

enum UnitOutcome {
    Confirmed,
    Skipped,
    Failed(FrameFailure),
}

/// Render `frames` and commit each result through `engine`.
///
/// `on_progress` is called after every finished unit. Failures of
/// individual frames are counted and never abort the batch.
pub async fn run_batch<R, P>(
    engine: SyncEngine,
    frames: Vec<Frame>,
    renderer: Arc<R>,
    options: BatchOptions,
    on_progress: P,
) -> BatchHandle
where
    R: FrameRenderer + ?Sized + 'static,
    P: Fn(BatchProgress) + Send + 'static,
{
    let total = frames.len();
    let gate_at = options.min_progress.min(total);
    let (gate_tx, gate_rx) = oneshot::channel();

    tracing::info!(
        path = %engine.path(),
        total,
        min_progress = gate_at,
        concurrency = options.concurrency.max(1),
        "Starting frame batch",
    );

    let remainder = tokio::spawn(drive(
        engine,
        frames,
        renderer,
        options.concurrency.max(1),
        gate_at,
        gate_tx,
        on_progress,
    ));

    let progress = match gate_rx.await {
        Ok(progress) => progress,
        // The driver only drops the gate without firing it if it panicked.
        Err(_) => BatchProgress {
            total,
            ..Default::default()
        },
    };

    BatchHandle {
        progress,
        remainder,
    }
}

async fn drive<R, P>(
    engine: SyncEngine,
    frames: Vec<Frame>,
    renderer: Arc<R>,
    concurrency: usize,
    gate_at: usize,
    gate_tx: oneshot::Sender<BatchProgress>,
    on_progress: P,
) -> BatchReport
where
    R: FrameRenderer + ?Sized + 'static,
    P: Fn(BatchProgress) + Send + 'static,
{
    let mut progress = BatchProgress {
        total: frames.len(),
        ..Default::default()
    };
    let mut failures = Vec::new();
    let mut gate = Some(gate_tx);

    if gate_at == 0 {
        if let Some(tx) = gate.take() {
            let _ = tx.send(progress);
        }
    }

    let permits = Arc::new(Semaphore::new(concurrency));
    let mut units = JoinSet::new();
    for frame in frames {
        let engine = engine.clone();
        let renderer = renderer.clone();
        let permits = permits.clone();
        units.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return UnitOutcome::Skipped;
            };
            let frame_id = frame.id.clone();
            match AssertUnwindSafe(render_unit(&engine, &*renderer, frame))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(payload) => UnitOutcome::Failed(FrameFailure {
                    frame_id,
                    error: format!("render unit panicked: {}", panic_message(&*payload)),
                }),
            }
        });
    }

    while let Some(joined) = units.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(path = %engine.path(), error = %e, "Render unit did not complete");
                continue;
            }
        };
        match outcome {
            UnitOutcome::Confirmed => progress.succeeded += 1,
            UnitOutcome::Skipped => progress.skipped += 1,
            UnitOutcome::Failed(failure) => {
                progress.failed += 1;
                failures.push(failure);
            }
        }

        on_progress(progress);
        engine.events().publish(SyncEvent::BatchProgress {
            path: engine.path().to_string(),
            total: progress.total,
            succeeded: progress.succeeded,
            failed: progress.failed,
            skipped: progress.skipped,
        });

        if progress.succeeded >= gate_at || progress.is_complete() {
            if let Some(tx) = gate.take() {
                let _ = tx.send(progress);
            }
        }
    }

    if let Some(tx) = gate.take() {
        let _ = tx.send(progress);
    }

    tracing::info!(
        path = %engine.path(),
        total = progress.total,
        succeeded = progress.succeeded,
        failed = progress.failed,
        skipped = progress.skipped,
        "Frame batch finished",
    );

    BatchReport { progress, failures }
}

async fn render_unit<R>(engine: &SyncEngine, renderer: &R, frame: Frame) -> UnitOutcome
where
    R: FrameRenderer + ?Sized,
{
    let media_ref = match renderer.render(&frame).await {
        Ok(media_ref) => media_ref,
        Err(e) => {
            tracing::warn!(frame_id = %frame.id, status = e.status, error = %e.message, "Render failed");
            return UnitOutcome::Failed(FrameFailure {
                frame_id: frame.id,
                error: e.to_string(),
            });
        }
    };

    // A reference the cleaning pass would drop must not finalize the frame.
    let kind = engine.config().media.classify(&media_ref);
    if kind != MediaKind::Durable {
        tracing::warn!(
            frame_id = %frame.id,
            kind = ?kind,
            media = %preview(&media_ref),
            "Renderer returned non-durable media",
        );
        return UnitOutcome::Failed(FrameFailure {
            frame_id: frame.id,
            error: format!("renderer returned non-durable media ({kind:?})"),
        });
    }

    match engine
        .apply_frame(&frame.id, FrameUpdate::rendered(media_ref))
        .await
    {
        Ok(FrameOutcome::Confirmed(doc)) => {
            let stored = doc.frame(&frame.id).and_then(|f| f.media_ref.as_deref());
            if engine.config().media.holds_durable(stored) {
                UnitOutcome::Confirmed
            } else {
                tracing::warn!(frame_id = %frame.id, "Confirmed frame holds no durable media");
                UnitOutcome::Failed(FrameFailure {
                    frame_id: frame.id,
                    error: "confirmed frame holds no durable media".into(),
                })
            }
        }
        Ok(FrameOutcome::Skipped(_)) => UnitOutcome::Skipped,
        Err(e) => {
            tracing::warn!(frame_id = %frame.id, error = %e, "Frame commit failed");
            UnitOutcome::Failed(FrameFailure {
                frame_id: frame.id,
                error: e.to_string(),
            })
        }
    }
}
