//! Step handlers: the work one pipeline step performs on a document.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::confidence::MergeError;
use crate::context::AppContext;
use crate::db::DatabaseError;
use crate::error::{QueueError, StorageError};
use crate::pipeline::{ArtifactType, FileDetail, PipelineError, PipelineState};

pub mod evaluate;
pub mod external;
pub mod registry;
pub mod save;
pub mod transform;

pub use evaluate::{DataExtractionResult, EvaluateHandler};
pub use external::ExternalCommandHandler;
pub use registry::{HandlerFactory, HandlerRegistry};
pub use save::SaveHandler;
pub use transform::TransformHandler;

pub const EXTRACT_STEP: &str = "extract";
pub const MAP_STEP: &str = "map";
pub const EVALUATE_STEP: &str = "evaluate";

#[derive(Error, Debug)]
pub enum StepError {
    #[error("No {artifact_type} output from step '{processed_by}'")]
    MissingInput {
        processed_by: String,
        artifact_type: ArtifactType,
    },

    #[error("Process has no source file")]
    MissingSource,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Artifact '{name}' is not valid JSON: {source}")]
    InvalidArtifact {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Confidence merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' failed: {message}")]
    External { program: String, message: String },

    #[error("{0}")]
    Failed(String),
}

/// Output document of the extract and map steps: a result plus the
/// per-field confidence tree that scored it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoredOutput {
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub confidence: Value,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Runs one step against a document.
///
/// Implementations return the step's result payload on success. Any error is
/// treated as transient by the dispatch loop and retried via redelivery.
pub trait StepHandler: Send + Sync {
    fn execute(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError>;
}

/// What a handler gets to work with: the shared clients and the document it
/// currently owns.
pub struct StepContext<'a> {
    pub step: &'a str,
    pub app: &'a AppContext,
    pub state: &'a mut PipelineState,
}

impl<'a> StepContext<'a> {
    pub fn new(step: &'a str, app: &'a AppContext, state: &'a mut PipelineState) -> Self {
        Self { step, app, state }
    }

    pub fn process_id(&self) -> &str {
        &self.state.process_id
    }

    /// Bytes of the latest `artifact_type` file produced by `processed_by`.
    pub fn download_output(
        &self,
        processed_by: &str,
        artifact_type: ArtifactType,
    ) -> Result<Vec<u8>, StepError> {
        let file = self
            .state
            .find_output_file(processed_by, artifact_type)
            .ok_or_else(|| StepError::MissingInput {
                processed_by: processed_by.to_string(),
                artifact_type,
            })?;
        Ok(self.app.storage.download(&self.state.process_id, &file.name)?)
    }

    pub fn download_output_json<T: DeserializeOwned>(
        &self,
        processed_by: &str,
        artifact_type: ArtifactType,
    ) -> Result<T, StepError> {
        let bytes = self.download_output(processed_by, artifact_type)?;
        serde_json::from_slice(&bytes).map_err(|e| StepError::InvalidArtifact {
            name: format!("{} output of '{}'", artifact_type, processed_by),
            source: e,
        })
    }

    /// The first file the producer attached.
    pub fn source_file(&self) -> Result<&FileDetail, StepError> {
        self.state.source_files().next().ok_or(StepError::MissingSource)
    }

    pub fn download_source(&self) -> Result<Vec<u8>, StepError> {
        let name = self.source_file()?.name.clone();
        Ok(self.app.storage.download(&self.state.process_id, &name)?)
    }

    /// Uploads `content` and records it as a new file of the active step.
    pub fn store_artifact(
        &mut self,
        file_name: &str,
        artifact_type: ArtifactType,
        content: &[u8],
        note: &str,
    ) -> Result<FileDetail, StepError> {
        self.app
            .storage
            .upload_bytes(&self.state.process_id, file_name, content)?;

        let step = self.step;
        let file = self.state.add_file(file_name, artifact_type);
        file.size = Some(content.len() as u64);
        file.add_log_entry(step, note);
        Ok(file.clone())
    }

    pub fn store_json_artifact<T: Serialize>(
        &mut self,
        file_name: &str,
        artifact_type: ArtifactType,
        value: &T,
        note: &str,
    ) -> Result<FileDetail, StepError> {
        let json = serde_json::to_vec(value).map_err(|e| StepError::InvalidArtifact {
            name: file_name.to_string(),
            source: e,
        })?;
        self.store_artifact(file_name, artifact_type, &json, note)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::config::Config;
    use crate::context::AppContext;
    use crate::db::Database;
    use crate::pipeline::{ArtifactType, FileDetail, PipelineState};
    use crate::queue::SqliteQueue;
    use crate::storage::ProcessStorage;

    use super::{ScoredOutput, StepContext};

    pub fn app() -> (TempDir, AppContext) {
        let dir = TempDir::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let app = AppContext::new(
            Config::default(),
            db.clone(),
            Arc::new(SqliteQueue::new(db)),
            ProcessStorage::new(dir.path()),
        );
        (dir, app)
    }

    /// A state whose source file `doc.pdf` is already in storage.
    pub fn state_with_source(app: &AppContext, process_id: &str) -> PipelineState {
        let mut state = PipelineState::new(process_id, app.config.process_steps.clone());
        app.storage
            .upload_bytes(process_id, "doc.pdf", b"%PDF-1.7")
            .unwrap();
        let mut file = FileDetail::new(process_id, "doc.pdf", ArtifactType::SourceContent, None);
        file.size = Some(8);
        state.files.push(file);
        state
    }

    /// Runs `step` far enough to leave `output` behind as its artifact.
    pub fn store_scored(
        app: &AppContext,
        state: &mut PipelineState,
        step: &str,
        artifact_type: ArtifactType,
        output: &ScoredOutput,
    ) {
        state.pipeline_status.begin_step(step).unwrap();
        let mut ctx = StepContext::new(step, app, state);
        ctx.store_json_artifact(&format!("{}_output.json", step), artifact_type, output, "added")
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{app, state_with_source};
    use super::*;

    #[test]
    fn test_store_and_download_artifact() {
        let (_dir, app) = app();
        let mut state = state_with_source(&app, "p1");
        state.pipeline_status.begin_step("extract").unwrap();

        let mut ctx = StepContext::new("extract", &app, &mut state);
        let file = ctx
            .store_artifact(
                "extract_output.json",
                ArtifactType::ExtractedContent,
                b"{\"a\":1}",
                "Extraction result has been added",
            )
            .unwrap();
        assert_eq!(file.size, Some(7));
        assert_eq!(file.processed_by.as_deref(), Some("extract"));
        assert_eq!(file.log_entries[0].source, "extract");

        let value: Value = ctx
            .download_output_json("extract", ArtifactType::ExtractedContent)
            .unwrap();
        assert_eq!(value["a"], 1);
        assert_eq!(ctx.download_source().unwrap(), b"%PDF-1.7");
    }

    #[test]
    fn test_missing_input() {
        let (_dir, app) = app();
        let mut state = state_with_source(&app, "p2");
        let ctx = StepContext::new("evaluate", &app, &mut state);

        let err = ctx
            .download_output("map", ArtifactType::SchemaMappedData)
            .unwrap_err();
        assert!(matches!(err, StepError::MissingInput { .. }));
        assert_eq!(
            err.to_string(),
            "No schema_mapped_data output from step 'map'"
        );
    }

    #[test]
    fn test_missing_source() {
        let (_dir, app) = app();
        let mut state = PipelineState::new("p3", vec!["extract".into()]);
        let ctx = StepContext::new("extract", &app, &mut state);
        assert!(matches!(ctx.download_source().unwrap_err(), StepError::MissingSource));
    }
}
