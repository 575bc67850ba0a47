//! Soak harness for the sync engine.
//!
//! Runs a generated storyboard through a bulk render against an in-memory
//! store while tab edits and remote snapshots compete for the same
//! document, then checks the stored result for lost or downgraded frames.

pub mod renderer;
pub mod soak;

pub use renderer::SimulatedRenderer;
pub use soak::{run_soak, SoakConfig, SoakConfigError, SoakReport};
