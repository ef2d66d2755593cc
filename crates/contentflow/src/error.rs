use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContentflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Step error: {0}")]
    Step(#[from] crate::handler::StepError),

    #[error("Merge error: {0}")]
    Merge(#[from] crate::confidence::MergeError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] crate::dispatch::DispatchError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    #[error("Handler registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write blob '{path}': {source}")]
    WriteBlob {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read blob '{path}': {source}")]
    ReadBlob {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Blob not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid blob name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Failed to serialize '{name}': {source}")]
    Serialize {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue backend error: {0}")]
    Backend(#[from] crate::db::DatabaseError),

    #[error("Message '{message_id}' not found in queue '{queue}'")]
    MessageNotFound { queue: String, message_id: String },

    #[error("Pop receipt for message '{message_id}' is stale (lease expired or message re-received)")]
    ReceiptMismatch { message_id: String },

    #[error("Invalid queue name '{0}'")]
    InvalidName(String),
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Failed to spawn worker '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No workers registered")]
    NoWorkers,

    #[error("Supervisor already started")]
    AlreadyStarted,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No handler registered for step '{0}'")]
    UnknownStep(String),

    #[error("Step '{0}' is listed more than once")]
    DuplicateStep(String),

    #[error("No process steps configured")]
    NoSteps,
}

pub type Result<T> = std::result::Result<T, ContentflowError>;
