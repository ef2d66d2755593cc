pub mod error;
pub mod file;
pub mod state;
pub mod status;
pub mod step_result;
pub mod stopwatch;

pub use error::PipelineError;
pub use file::{detect_mime_type, ArtifactType, FileDetail, PipelineLogEntry};
pub use state::PipelineState;
pub use status::PipelineStatus;
pub use step_result::{SerializableException, StepResult};
pub use stopwatch::{format_elapsed, parse_elapsed, sum_elapsed, Stopwatch};
