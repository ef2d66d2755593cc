pub mod loader;
pub mod schema;

pub use loader::{apply_overrides, load_config, load_config_from_str, validate_config};
pub use schema::{
    default_process_steps, Config, EvaluationConfig, ExternalStepConfig, LogFormat,
    LoggingConfig, QueueConfig, SupervisorConfig, SupervisorMode,
};
