//! Broadcasting of per-step progress events to in-process subscribers.

pub mod step_progress;

pub use step_progress::{StepPhase, StepProgressBroadcaster, StepProgressEvent, StepProgressTracker};
