use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::{QueueError, RegistryError, StorageError};
use crate::pipeline::PipelineError;

/// Failures of the dispatch loop itself. Step failures never surface here;
/// they are recorded in the pipeline state and retried.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Handler error: {0}")]
    Registry(#[from] RegistryError),
}
