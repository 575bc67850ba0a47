use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use showrunner_events::{EventBus, SyncEvent};
use showrunner_sync::SyncConfig;
use showrunner_worker::{run_soak, SoakConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "showrunner_worker=debug,showrunner_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let soak = SoakConfig::from_env()?;
    let sync = SyncConfig::from_env()?;
    tracing::info!(
        episode = %soak.episode_id,
        frames = soak.frames,
        concurrency = soak.concurrency,
        verify_delay_ms = sync.verify_delay.as_millis() as u64,
        "Soak worker starting",
    );

    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event @ (SyncEvent::PersistFailed { .. } | SyncEvent::VerificationFailed { .. })) => {
                    tracing::warn!(event = event.name(), detail = ?event, "Sync failure event");
                }
                Ok(event) => tracing::trace!(event = event.name(), "Sync event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let report = run_soak(&soak, sync, events).await?;
    logger.abort();

    tracing::info!(
        gate_succeeded = report.gate.succeeded,
        succeeded = report.batch.progress.succeeded,
        failed = report.batch.progress.failed,
        skipped = report.batch.progress.skipped,
        finalized = report.stored.finalized_frames,
        total = report.stored.total_frames,
        "Soak run finished",
    );

    if !report.is_clean() {
        anyhow::bail!("{} invariant violation(s)", report.violations.len());
    }
    Ok(())
}
