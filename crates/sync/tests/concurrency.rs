//! Concurrent writers against one document.
//!
//! These run on a multi-threaded runtime with write latency injected into
//! the store, so that without serialization later writes would be built on
//! stale bases and overwrite earlier ones.

mod common;

use std::time::Duration;

use common::{media_url, test_config, Harness};
use showrunner_core::FrameUpdate;
use showrunner_sync::{StoreError, SyncError};

// ---------------------------------------------------------------------------
// Test: no update is lost when many frames are updated at once
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_are_all_preserved() {
    const FRAMES: usize = 40;

    let ids: Vec<String> = (0..FRAMES).map(|i| format!("f{i}")).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let (first, second) = id_refs.split_at(FRAMES / 2);
    let h = Harness::seeded(test_config(), &[(1, first), (2, second)]).await;
    h.store.set_write_latency(Some(Duration::from_millis(2))).await;

    let mut tasks = Vec::new();
    for id in &ids {
        let engine = h.engine.clone();
        let id = id.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .update_frame(&id, FrameUpdate::rendered(media_url(&id)))
                .await
        }));
    }
    for task in tasks {
        task.await.expect("task should not panic").unwrap();
    }

    let stored = h.stored().await;
    assert_eq!(stored.total_frames, FRAMES);
    assert_eq!(stored.finalized_frames, FRAMES);
    for id in &ids {
        assert_eq!(
            stored.frame(id).unwrap().media_ref.as_deref(),
            Some(media_url(id).as_str()),
            "frame {id} lost its update"
        );
    }
    assert_eq!(h.cached().await, stored);
}

// ---------------------------------------------------------------------------
// Test: two near-simultaneous updates in the same scene both land
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn near_simultaneous_updates_in_one_scene() {
    let h = Harness::seeded(test_config(), &[(1, &["f1", "f2"])]).await;
    h.store.set_write_latency(Some(Duration::from_millis(5))).await;

    let (a, b) = tokio::join!(
        h.engine
            .update_frame("f1", FrameUpdate::rendered(media_url("f1"))),
        h.engine
            .update_frame("f2", FrameUpdate::rendered(media_url("f2"))),
    );
    a.unwrap();
    b.unwrap();

    let stored = h.stored().await;
    assert_eq!(
        stored.frame("f1").unwrap().media_ref.as_deref(),
        Some(media_url("f1").as_str())
    );
    assert_eq!(
        stored.frame("f2").unwrap().media_ref.as_deref(),
        Some(media_url("f2").as_str())
    );
    assert_eq!(stored.finalized_frames, 2);
}

// ---------------------------------------------------------------------------
// Test: failures among concurrent updates only affect their own callers
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_write_among_concurrent_updates_is_isolated() {
    let h = Harness::seeded(test_config(), &[(1, &["f1", "f2", "f3"])]).await;
    h.store
        .fail_next_write(StoreError::PermissionDenied("quota".into()))
        .await;

    let mut tasks = Vec::new();
    for id in ["f1", "f2", "f3"] {
        let engine = h.engine.clone();
        tasks.push(tokio::spawn(async move {
            engine
                .update_frame(id, FrameUpdate::rendered(media_url(id)))
                .await
        }));
    }

    let mut failures = 0;
    for task in tasks {
        match task.await.expect("task should not panic") {
            Ok(_) => {}
            Err(SyncError::Persist(StoreError::PermissionDenied(_))) => failures += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(failures, 1);

    let stored = h.stored().await;
    assert_eq!(stored.finalized_frames, 2);
    assert_eq!(h.cached().await, stored);
}

// ---------------------------------------------------------------------------
// Test: a caller that stops waiting does not cancel its update
// ---------------------------------------------------------------------------

#[tokio::test]
async fn abandoned_update_still_completes() {
    let h = Harness::seeded(test_config(), &[(1, &["f1", "f2"])]).await;
    h.store.set_write_latency(Some(Duration::from_millis(20))).await;

    let engine = h.engine.clone();
    let abandoned = tokio::spawn(async move {
        engine
            .update_frame("f1", FrameUpdate::rendered(media_url("f1")))
            .await
    });
    // Let the update get queued, then stop waiting for it.
    tokio::time::sleep(Duration::from_millis(5)).await;
    abandoned.abort();

    h.engine
        .update_frame("f2", FrameUpdate::rendered(media_url("f2")))
        .await
        .unwrap();

    let stored = h.stored().await;
    assert_eq!(stored.finalized_frames, 2);
}
