//! Run state
//!
//! History of finished cycles for the current run.

mod model;

pub use model::{RotationHistory, RunSummary, StopReason};
