//! State module for tracking update progress
//!
//! # Components
//!
//! - `UpdatePhase`: The phase an update run is in (discovering, fetching, draining, ...)
//! - `ProgressEvent` / `ProgressReporter`: Events sent to an optional progress sink

mod progress;
mod update_phase;

// Re-export main types
pub use progress::{Milestones, ProgressEvent, ProgressReporter};
pub use update_phase::UpdatePhase;
