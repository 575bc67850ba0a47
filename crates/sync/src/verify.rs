//! Read-after-write check for frame updates.

use std::time::Duration;

use showrunner_core::Document;

use crate::error::SyncError;
use crate::store::{DocumentPath, DocumentStore};

/// Wait `delay`, read the document back, and check that `frame_id` holds
/// `expected` as its media reference.
///
/// A missing document or frame counts as a mismatch.
pub async fn verify_frame(
    store: &dyn DocumentStore,
    path: &DocumentPath,
    frame_id: &str,
    expected: Option<&str>,
    delay: Duration,
) -> Result<(), SyncError> {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let value = store.read(path).await.map_err(SyncError::Read)?;
    let found = match value {
        Some(value) => Document::from_store_value(value)?
            .frame(frame_id)
            .map(|f| f.media_ref.clone()),
        None => None,
    };

    match found {
        Some(found) if found.as_deref() == expected => Ok(()),
        found => Err(SyncError::Verification {
            frame_id: frame_id.to_string(),
            expected: expected.map(str::to_string),
            found: found.flatten(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
