//! The sync engine: every mutation of one document goes through here.
//!
//! [`SyncEngine`] is a cheap-to-clone handle. All clones share one write
//! serializer, so frame updates, tab updates, hydration and incoming
//! snapshots are applied one at a time against the staging copy.

use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use showrunner_core::merge::{apply_frame_update, merge_scenes, merge_section, merge_snapshot};
use showrunner_core::validation::clean_document;
use showrunner_core::{CoreError, Document, FrameId, FrameUpdate, ScenePatch, Tab};
use showrunner_events::{EventBus, SnapshotDecision, SyncEvent};

use crate::config::{SyncConfig, UnknownFramePolicy};
use crate::error::SyncError;
use crate::serializer::WriteSerializer;
use crate::state::SyncState;
use crate::store::{DocumentPath, DocumentStore};
use crate::subscription;
use crate::verify::verify_frame;

/// Result of a single-frame update.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    /// Persisted, verified, and now in the staging copy.
    Confirmed(Document),
    /// The frame does not exist; nothing was written.
    Skipped(Document),
}

impl FrameOutcome {
    pub fn document(&self) -> &Document {
        match self {
            Self::Confirmed(doc) | Self::Skipped(doc) => doc,
        }
    }

    pub fn into_document(self) -> Document {
        match self {
            Self::Confirmed(doc) | Self::Skipped(doc) => doc,
        }
    }
}

/// What a queued step needs besides the serializer-owned state.
#[derive(Clone)]
struct StepContext {
    path: DocumentPath,
    store: Arc<dyn DocumentStore>,
    config: Arc<SyncConfig>,
    events: Arc<EventBus>,
}

impl StepContext {
    fn base(&self, state: &SyncState) -> Document {
        state
            .cache
            .get()
            .cloned()
            .unwrap_or_else(|| Document::empty(self.config.editor.clone()))
    }

    /// Stamp, clean and write `next`. Returns what was written.
    async fn persist(&self, mut next: Document) -> Result<Document, SyncError> {
        next.touch(self.config.editor.as_deref());

        let report = clean_document(next, &self.config.media);
        for rejection in report.rejections {
            self.events.publish(SyncEvent::MediaRejected {
                path: self.path.to_string(),
                rejection,
            });
        }
        if report.nulls_dropped > 0 {
            tracing::debug!(path = %self.path, nulls = report.nulls_dropped, "Dropped nulls before persist");
        }

        let document = report.document;
        let value = document.to_store_value()?;
        if let Err(e) = self.store.write(&self.path, &value).await {
            tracing::error!(path = %self.path, error = %e, "Document write failed");
            self.events.publish(SyncEvent::PersistFailed {
                path: self.path.to_string(),
                error: e.to_string(),
            });
            return Err(SyncError::Persist(e));
        }

        Ok(document)
    }

    async fn update_frame(
        &self,
        state: &mut SyncState,
        frame_id: FrameId,
        update: FrameUpdate,
    ) -> Result<FrameOutcome, SyncError> {
        let base = self.base(state);

        let next = match apply_frame_update(&base, &frame_id, &update, &self.config.media) {
            Ok(next) => next,
            Err(CoreError::FrameNotFound(_)) => {
                return match self.config.unknown_frame_policy {
                    UnknownFramePolicy::Skip => {
                        tracing::warn!(path = %self.path, frame_id = %frame_id, "Frame not found, update skipped");
                        self.events.publish(SyncEvent::FrameSkipped {
                            path: self.path.to_string(),
                            frame_id,
                        });
                        Ok(FrameOutcome::Skipped(base))
                    }
                    UnknownFramePolicy::Reject => Err(SyncError::UnknownFrame(frame_id)),
                };
            }
            Err(e) => return Err(e.into()),
        };

        let persisted = self.persist(next).await?;
        let expected = persisted.frame(&frame_id).and_then(|f| f.media_ref.clone());

        if let Err(e) = verify_frame(
            self.store.as_ref(),
            &self.path,
            &frame_id,
            expected.as_deref(),
            self.config.verify_delay,
        )
        .await
        {
            if let SyncError::Verification {
                frame_id,
                expected,
                found,
            } = &e
            {
                tracing::error!(
                    path = %self.path,
                    frame_id = %frame_id,
                    expected = ?expected,
                    found = ?found,
                    "Frame did not read back as written",
                );
                self.events.publish(SyncEvent::VerificationFailed {
                    path: self.path.to_string(),
                    frame_id: frame_id.clone(),
                    expected: expected.clone(),
                    found: found.clone(),
                });
            }
            return Err(e);
        }

        let now = Instant::now();
        state.pending.prune(now);
        if let Some(media_ref) = &expected {
            state.pending.mark(&frame_id, media_ref, now);
        }
        state.cache.set(persisted.clone());

        tracing::info!(
            path = %self.path,
            frame_id = %frame_id,
            finalized = persisted.finalized_frames,
            total = persisted.total_frames,
            "Frame update confirmed",
        );
        self.events.publish(SyncEvent::FrameConfirmed {
            path: self.path.to_string(),
            frame_id,
            media_ref: expected,
            at: persisted.updated_at,
        });

        Ok(FrameOutcome::Confirmed(persisted))
    }

    async fn update_tab(
        &self,
        state: &mut SyncState,
        tab: Tab,
        data: Value,
    ) -> Result<Document, SyncError> {
        let base = self.base(state);

        let next = match tab {
            Tab::Storyboard => {
                let patches = ScenePatch::parse_many(data)?;
                let outcome = merge_scenes(&base, patches, &self.config.media);
                if !outcome.collapsed.is_empty() {
                    tracing::warn!(
                        path = %self.path,
                        collapsed = ?outcome.collapsed,
                        "Collapsed duplicate frames in storyboard update",
                    );
                }
                outcome.document
            }
            other => merge_section(&base, other, data),
        };

        let persisted = self.persist(next).await?;
        state.cache.set(persisted.clone());
        tracing::info!(path = %self.path, tab = %tab, "Tab update persisted");
        Ok(persisted)
    }

    fn apply_snapshot(&self, state: &mut SyncState, value: Value) -> SnapshotDecision {
        let (decision, frame_id) = match Document::from_store_value(value) {
            Ok(snapshot) => {
                subscription::reconcile(state, snapshot, &self.config.media, Instant::now())
            }
            Err(e) => {
                tracing::warn!(path = %self.path, error = %e, "Ignoring malformed snapshot");
                (SnapshotDecision::IgnoredMalformed, None)
            }
        };

        match decision {
            SnapshotDecision::Merged => {
                tracing::debug!(path = %self.path, "Snapshot merged");
            }
            SnapshotDecision::IgnoredLagging => {
                tracing::debug!(path = %self.path, frame_id = ?frame_id, "Snapshot lags a confirmed write");
            }
            _ => {}
        }
        self.events.publish(SyncEvent::Snapshot {
            path: self.path.to_string(),
            decision,
            frame_id,
        });
        decision
    }
}

/// Handle to the sync engine for one document.
#[derive(Clone)]
pub struct SyncEngine {
    ctx: StepContext,
    serializer: WriteSerializer<SyncState>,
}

impl SyncEngine {
    /// Create an engine with an empty staging copy. Spawns the serializer
    /// worker, so this must run inside a Tokio runtime.
    pub fn new(
        path: DocumentPath,
        store: Arc<dyn DocumentStore>,
        config: SyncConfig,
        events: Arc<EventBus>,
    ) -> Self {
        let state = SyncState::new(config.pending_write_ttl);
        let serializer = WriteSerializer::spawn(state, config.queue_capacity);
        Self {
            ctx: StepContext {
                path,
                store,
                config: Arc::new(config),
                events,
            },
            serializer,
        }
    }

    pub fn path(&self) -> &DocumentPath {
        &self.ctx.path
    }

    pub fn config(&self) -> &SyncConfig {
        &self.ctx.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.ctx.events
    }

    /// Load the stored document into the staging copy.
    ///
    /// Merges structurally, so anything already staged survives. Returns
    /// the staging copy afterwards (`None` if the store has no document and
    /// nothing was staged).
    pub async fn hydrate(&self) -> Result<Option<Document>, SyncError> {
        let ctx = self.ctx.clone();
        self.serializer
            .run(move |state: &mut SyncState| {
                async move {
                    let value = ctx.store.read(&ctx.path).await.map_err(SyncError::Read)?;
                    if let Some(value) = value {
                        let stored = Document::from_store_value(value)?;
                        let merged = match state.cache.get() {
                            Some(base) => merge_snapshot(base, &stored, &ctx.config.media).document,
                            None => stored,
                        };
                        state.cache.set(merged);
                    }
                    tracing::info!(path = %ctx.path, staged = !state.cache.is_empty(), "Hydrated staging copy");
                    Ok(state.cache.get().cloned())
                }
                .boxed()
            })
            .await
    }

    /// Current staging copy. Queued behind any in-flight mutation.
    pub async fn snapshot(&self) -> Result<Option<Document>, SyncError> {
        self.serializer
            .run(|state: &mut SyncState| async move { Ok(state.cache.get().cloned()) }.boxed())
            .await
    }

    /// Apply a field-level update to one frame, persist the whole document
    /// and verify the frame reads back as written.
    ///
    /// Returns the confirmed document, or the unchanged staging copy when
    /// the frame is unknown and the policy is to skip.
    pub async fn update_frame(
        &self,
        frame_id: &str,
        update: FrameUpdate,
    ) -> Result<Document, SyncError> {
        self.apply_frame(frame_id, update)
            .await
            .map(FrameOutcome::into_document)
    }

    /// Like [`update_frame`](Self::update_frame) but says whether the
    /// update was confirmed or skipped.
    pub async fn apply_frame(
        &self,
        frame_id: &str,
        update: FrameUpdate,
    ) -> Result<FrameOutcome, SyncError> {
        let ctx = self.ctx.clone();
        let frame_id = frame_id.to_string();
        self.serializer
            .run(move |state: &mut SyncState| {
                async move { ctx.update_frame(state, frame_id, update).await }.boxed()
            })
            .await
    }

    /// Merge tab data into the document and persist it. Storyboard data is
    /// merged scene by scene; other tabs are overlaid as a section.
    pub async fn update_tab(&self, tab: Tab, data: Value) -> Result<Document, SyncError> {
        let ctx = self.ctx.clone();
        self.serializer
            .run(move |state: &mut SyncState| {
                async move { ctx.update_tab(state, tab, data).await }.boxed()
            })
            .await
    }

    /// Reconcile one remote snapshot with the staging copy.
    pub async fn apply_snapshot(&self, value: Value) -> Result<SnapshotDecision, SyncError> {
        let ctx = self.ctx.clone();
        self.serializer
            .run(move |state: &mut SyncState| {
                async move { Ok(ctx.apply_snapshot(state, value)) }.boxed()
            })
            .await
    }

    /// Identifiers of frames with confirmed writes still awaited from
    /// remote snapshots.
    pub async fn pending_frames(&self) -> Result<Vec<FrameId>, SyncError> {
        self.serializer
            .run(|state: &mut SyncState| {
                async move {
                    state.pending.prune(Instant::now());
                    Ok(state
                        .pending
                        .outstanding()
                        .iter()
                        .map(|m| m.frame_id.clone())
                        .collect())
                }
                .boxed()
            })
            .await
    }

    /// Follow the store's snapshots for this document until `cancel` fires
    /// or the stream ends.
    pub fn spawn_subscription(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move { subscription::run(engine, cancel).await })
    }

    pub(crate) fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.ctx.store
    }
}
