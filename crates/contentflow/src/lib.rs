pub mod broadcast;
pub mod confidence;
pub mod config;
pub mod context;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod storage;
pub mod supervisor;

pub use broadcast::{StepPhase, StepProgressBroadcaster, StepProgressEvent};
pub use confidence::{flatten_for_comparison, merge, MergedConfidence, ScoreResolver};
pub use config::{load_config, Config};
pub use context::{AppContext, SubmitOptions};
pub use db::Database;
pub use dispatch::{DispatchError, DispatchOutcome, QueueDispatchLoop};
pub use error::{
    ConfigError, ContentflowError, QueueError, RegistryError, Result, StorageError,
    SupervisorError,
};
pub use handler::{HandlerRegistry, StepContext, StepError, StepHandler};
pub use logging::init_logging;
pub use pipeline::{ArtifactType, FileDetail, PipelineState, PipelineStatus, StepResult};
pub use queue::{QueueMessage, QueueTransport, SqliteQueue};
pub use storage::ProcessStorage;
pub use supervisor::{
    ProcessLauncher, Shutdown, ShutdownToken, Supervisor, ThreadLauncher, WorkerExit,
};
