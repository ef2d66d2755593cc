//! Isolated pipeline environment for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use contentflow::config::Config;
use contentflow::db::Database;
use contentflow::dispatch::{DispatchOutcome, QueueDispatchLoop};
use contentflow::handler::{HandlerRegistry, ScoredOutput, StepContext, StepError, StepHandler};
use contentflow::pipeline::{ArtifactType, PipelineState};
use contentflow::queue::{QueueTransport, SqliteQueue};
use contentflow::storage::ProcessStorage;
use contentflow::{AppContext, SubmitOptions};

use super::builders::{invoice_extraction, invoice_mapping};

/// Stores a fixed `ScoredOutput` as the step's artifact.
pub struct CannedStep {
    pub file_name: &'static str,
    pub artifact_type: ArtifactType,
    pub output: ScoredOutput,
}

impl StepHandler for CannedStep {
    fn execute(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        ctx.download_source()?;
        let file = ctx.store_json_artifact(
            self.file_name,
            self.artifact_type,
            &self.output,
            "Canned output has been added",
        )?;
        Ok(json!({ "result": "success", "file_name": file.name }))
    }
}

pub struct TestHarness {
    temp_dir: TempDir,
    pub app: AppContext,
    pub registry: HandlerRegistry,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(super::ConfigBuilder::new().build())
    }

    /// Built-in handlers plus canned `extract` and `map` steps.
    pub fn with_config(mut config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        config.storage_directory = temp_dir.path().join("storage").to_string_lossy().into_owned();

        let db = Database::open_in_memory().expect("Failed to open database");
        let storage = ProcessStorage::new(config.storage_path());
        let app = AppContext::new(config, db.clone(), Arc::new(SqliteQueue::new(db)), storage);

        let mut registry = HandlerRegistry::with_builtins(&app.config);
        registry.register("extract", |_| {
            Ok(Box::new(CannedStep {
                file_name: "extract_output.json",
                artifact_type: ArtifactType::ExtractedContent,
                output: invoice_extraction(),
            }))
        });
        registry.register("map", |_| {
            Ok(Box::new(CannedStep {
                file_name: "map_output.json",
                artifact_type: ArtifactType::SchemaMappedData,
                output: invoice_mapping(),
            }))
        });

        Self {
            temp_dir,
            app,
            registry,
        }
    }

    pub fn submit(&self, file_name: &str, content: &[u8]) -> String {
        self.app
            .submit(file_name, content, &SubmitOptions::default())
            .expect("Failed to submit document")
    }

    pub fn dispatcher(&self, step: &str) -> QueueDispatchLoop {
        let dispatcher = QueueDispatchLoop::from_registry(step, self.app.clone(), &self.registry)
            .expect("No handler for step");
        dispatcher.prepare().expect("Failed to prepare queues");
        dispatcher
    }

    /// Runs every step's loop until all queues are idle. Returns every
    /// non-idle outcome in order.
    pub fn drain(&self) -> Vec<DispatchOutcome> {
        let dispatchers: Vec<_> = self
            .app
            .config
            .process_steps
            .iter()
            .map(|step| self.dispatcher(step))
            .collect();

        let mut outcomes = Vec::new();
        loop {
            let mut progressed = false;
            for dispatcher in &dispatchers {
                let outcome = dispatcher.run_once().expect("Dispatch failed");
                if outcome != DispatchOutcome::Idle {
                    outcomes.push(outcome);
                    progressed = true;
                }
            }
            if !progressed {
                return outcomes;
            }
        }
    }

    pub fn state(&self, process_id: &str) -> PipelineState {
        self.app
            .storage
            .load_pipeline_state(process_id)
            .expect("No stored pipeline state")
    }

    pub fn queue_len(&self, queue: &str) -> u64 {
        self.app.queue.approximate_count(queue).expect("Queue count failed")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
