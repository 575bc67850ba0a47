//! Stand-in for an image generation service.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use showrunner_core::Frame;
use showrunner_sync::{FrameRenderer, RenderError};

/// Renders after a random delay and fails a configurable share of frames.
pub struct SimulatedRenderer {
    base_url: String,
    max_latency: Duration,
    failure_rate: f64,
}

impl SimulatedRenderer {
    /// `failure_rate` is clamped to `[0, 1]`.
    pub fn new(base_url: impl Into<String>, max_latency: Duration, failure_rate: f64) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_latency,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }

    /// Durable reference this renderer produces for `frame_id`.
    pub fn url_for(&self, frame_id: &str) -> String {
        format!("{}/frames/{frame_id}.png", self.base_url)
    }
}

#[async_trait]
impl FrameRenderer for SimulatedRenderer {
    async fn render(&self, frame: &Frame) -> Result<String, RenderError> {
        // ThreadRng is not Send; draw everything before the first await.
        let (latency_ms, fail) = {
            let mut rng = rand::rng();
            let max_ms = self.max_latency.as_millis() as u64;
            (rng.random_range(0..=max_ms), rng.random_bool(self.failure_rate))
        };

        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if fail {
            tracing::debug!(frame_id = %frame.id, latency_ms, "Simulated render failure");
            return Err(RenderError {
                status: 503,
                message: "simulated generation failure".into(),
            });
        }
        Ok(self.url_for(&frame.id))
    }
}
