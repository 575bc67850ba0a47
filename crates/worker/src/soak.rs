use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use showrunner_core::types::new_frame_id;
use showrunner_core::{Document, FrameStatus, Tab};
use showrunner_events::EventBus;
use showrunner_sync::{
    run_batch, BatchOptions, BatchProgress, BatchReport, DocumentPath, DocumentStore,
    InMemoryStore, SyncConfig, SyncEngine,
};

use crate::renderer::SimulatedRenderer;

/// Media host the simulated renderer writes to.
const MEDIA_BASE_URL: &str = "https://media.showrunner.local";

/// Soak run parameters loaded from environment variables.
#[derive(Debug, Clone)]
pub struct SoakConfig {
    pub episode_id: String,
    pub frames: usize,
    pub scenes: usize,
    pub min_progress: usize,
    pub concurrency: usize,
    pub failure_rate: f64,
    pub max_render_latency: Duration,
    /// Shot list edits issued while the batch runs.
    pub tab_edits: usize,
}

impl Default for SoakConfig {
    fn default() -> Self {
        Self {
            episode_id: "soak".into(),
            frames: 24,
            scenes: 4,
            min_progress: 6,
            concurrency: 4,
            failure_rate: 0.1,
            max_render_latency: Duration::from_millis(40),
            tab_edits: 8,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{var} is invalid: '{value}'")]
pub struct SoakConfigError {
    pub var: &'static str,
    pub value: String,
}

impl SoakConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default |
    /// |--------------------------|---------|
    /// | `SOAK_EPISODE`           | `soak`  |
    /// | `SOAK_FRAMES`            | `24`    |
    /// | `SOAK_SCENES`            | `4`     |
    /// | `SOAK_MIN_PROGRESS`      | `6`     |
    /// | `SOAK_CONCURRENCY`       | `4`     |
    /// | `SOAK_FAILURE_RATE`      | `0.1`   |
    /// | `SOAK_MAX_LATENCY_MS`    | `40`    |
    /// | `SOAK_TAB_EDITS`         | `8`     |
    pub fn from_env() -> Result<Self, SoakConfigError> {
        let defaults = Self::default();

        let episode_id = std::env::var("SOAK_EPISODE").unwrap_or(defaults.episode_id);
        let frames = env_parse("SOAK_FRAMES", defaults.frames)?;
        let scenes = env_parse("SOAK_SCENES", defaults.scenes)?.max(1);
        let min_progress = env_parse("SOAK_MIN_PROGRESS", defaults.min_progress)?;
        let concurrency = env_parse("SOAK_CONCURRENCY", defaults.concurrency)?;
        let failure_rate: f64 = env_parse("SOAK_FAILURE_RATE", defaults.failure_rate)?;
        if !(0.0..=1.0).contains(&failure_rate) {
            return Err(SoakConfigError {
                var: "SOAK_FAILURE_RATE",
                value: failure_rate.to_string(),
            });
        }
        let max_latency_ms: u64 = env_parse(
            "SOAK_MAX_LATENCY_MS",
            defaults.max_render_latency.as_millis() as u64,
        )?;
        let tab_edits = env_parse("SOAK_TAB_EDITS", defaults.tab_edits)?;

        Ok(Self {
            episode_id,
            frames,
            scenes,
            min_progress,
            concurrency,
            failure_rate,
            max_render_latency: Duration::from_millis(max_latency_ms),
            tab_edits,
        })
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, SoakConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| SoakConfigError { var, value }),
        Err(_) => Ok(default),
    }
}

/// Outcome of one soak run.
#[derive(Debug)]
pub struct SoakReport {
    /// Progress when the batch call returned.
    pub gate: BatchProgress,
    pub batch: BatchReport,
    /// The document as stored at the end of the run.
    pub stored: Document,
    /// Invariant violations found in the stored document.
    pub violations: Vec<String>,
}

impl SoakReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Storyboard tab data with `frames` frames spread over `scenes` scenes.
pub fn generate_storyboard(frames: usize, scenes: usize) -> serde_json::Value {
    let scenes = scenes.max(1);
    let mut per_scene: Vec<Vec<serde_json::Value>> = vec![Vec::new(); scenes];
    for i in 0..frames {
        let scene_index = i % scenes;
        let shot = per_scene[scene_index].len() + 1;
        per_scene[scene_index].push(json!({
            "id": new_frame_id(),
            "sceneNumber": scene_index + 1,
            "shotNumber": shot,
            "prompt": format!("Scene {} shot {shot}", scene_index + 1),
        }));
    }

    let scenes: Vec<serde_json::Value> = per_scene
        .into_iter()
        .enumerate()
        .map(|(i, frames)| json!({"sceneNumber": i + 1, "frames": frames}))
        .collect();
    json!({ "scenes": scenes })
}

/// Run a full soak cycle.
///
/// 1. Seed the storyboard through a tab update.
/// 2. Follow the store's snapshots in the background.
/// 3. Render every frame in a batch while shot-list edits are issued
///    against the same document.
/// 4. Compare the stored document with the batch report.
pub async fn run_soak(
    soak: &SoakConfig,
    sync: SyncConfig,
    events: Arc<EventBus>,
) -> anyhow::Result<SoakReport> {
    let store = Arc::new(InMemoryStore::new());
    let path = DocumentPath::episode(&soak.episode_id);
    let engine = SyncEngine::new(
        path.clone(),
        store.clone() as Arc<dyn DocumentStore>,
        sync,
        events,
    );

    engine
        .update_tab(Tab::Storyboard, generate_storyboard(soak.frames, soak.scenes))
        .await?;

    let cancel = CancellationToken::new();
    let subscription = engine.spawn_subscription(cancel.clone());

    let editor = {
        let engine = engine.clone();
        let edits = soak.tab_edits;
        tokio::spawn(async move {
            for revision in 1..=edits {
                let data = json!({"revision": revision, "lockedBy": "soak-editor"});
                if let Err(e) = engine.update_tab(Tab::ShotList, data).await {
                    tracing::warn!(revision, error = %e, "Shot list edit failed");
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let frames: Vec<_> = engine
        .snapshot()
        .await?
        .map(|doc| doc.frames().cloned().collect())
        .unwrap_or_default();
    let renderer = Arc::new(SimulatedRenderer::new(
        MEDIA_BASE_URL,
        soak.max_render_latency,
        soak.failure_rate,
    ));

    let handle = run_batch(
        engine.clone(),
        frames,
        renderer.clone(),
        BatchOptions {
            min_progress: soak.min_progress,
            concurrency: soak.concurrency,
        },
        |progress| {
            tracing::debug!(
                succeeded = progress.succeeded,
                failed = progress.failed,
                total = progress.total,
                "Batch progress",
            );
        },
    )
    .await;
    let gate = handle.progress;
    tracing::info!(succeeded = gate.succeeded, total = gate.total, "Batch threshold reached");

    let batch = handle.finish().await?;
    editor.await?;
    cancel.cancel();
    subscription.await?;

    let stored = match store.current(&path).await {
        Some(value) => Document::from_store_value(value)?,
        None => anyhow::bail!("soak document missing from store"),
    };
    let cached = engine.snapshot().await?;

    let violations = check_invariants(soak, &batch, &stored, cached.as_ref(), &renderer);
    for violation in &violations {
        tracing::error!(violation = %violation, "Soak invariant violated");
    }

    Ok(SoakReport {
        gate,
        batch,
        stored,
        violations,
    })
}

fn check_invariants(
    soak: &SoakConfig,
    batch: &BatchReport,
    stored: &Document,
    cached: Option<&Document>,
    renderer: &SimulatedRenderer,
) -> Vec<String> {
    let mut violations = Vec::new();
    let failed: std::collections::HashSet<&str> =
        batch.failures.iter().map(|f| f.frame_id.as_str()).collect();

    if stored.total_frames != soak.frames {
        violations.push(format!(
            "expected {} frames, store holds {}",
            soak.frames, stored.total_frames
        ));
    }
    if stored.finalized_frames != batch.progress.succeeded {
        violations.push(format!(
            "batch confirmed {} frames, store has {} finalized",
            batch.progress.succeeded, stored.finalized_frames
        ));
    }

    for frame in stored.frames() {
        let expected = renderer.url_for(&frame.id);
        let confirmed = !failed.contains(frame.id.as_str());
        match (&frame.media_ref, confirmed) {
            (Some(media), true) if *media == expected && frame.status == FrameStatus::Final => {}
            (None, false) => {}
            (media, _) => violations.push(format!(
                "frame {} has media {:?} and status {:?} (confirmed: {confirmed})",
                frame.id, media, frame.status
            )),
        }
    }

    if stored.sections.get(Tab::ShotList.as_str()).is_none() && soak.tab_edits > 0 {
        violations.push("shot list edits were lost".to_string());
    }

    match cached {
        Some(cached) if cached.frames().eq(stored.frames()) => {}
        _ => violations.push("staging copy diverged from the store".to_string()),
    }

    violations
}
