//! Canonical per-document progress record and its transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::PipelineError;
use super::step_result::{SerializableException, StepResult};

/// Which steps a document still has to go through, which are done, and what
/// each of them produced.
///
/// Invariants held by the transition methods:
/// - `completed_steps` and `remaining_steps` are disjoint and their union is `steps`
/// - `completed == remaining_steps.is_empty()`
/// - `active_step`, when set, is a member of `steps`
/// - `process_results` holds at most one entry per step name
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineStatus {
    #[serde(default, alias = "Completed")]
    pub completed: bool,
    #[serde(default, alias = "ProcessId")]
    pub process_id: String,
    #[serde(default, alias = "MetadataId")]
    pub metadata_id: Option<String>,
    #[serde(default, alias = "SchemaId")]
    pub schema_id: Option<String>,
    #[serde(default, alias = "CreationTime")]
    pub creation_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "LastUpdateTime")]
    pub last_updated_time: Option<DateTime<Utc>>,
    #[serde(default, alias = "ActiveStep")]
    pub active_step: Option<String>,
    #[serde(default, alias = "Steps")]
    pub steps: Vec<String>,
    #[serde(default, alias = "RemainingSteps")]
    pub remaining_steps: Vec<String>,
    #[serde(default, alias = "CompletedSteps")]
    pub completed_steps: Vec<String>,
    #[serde(default, alias = "ProcessResults")]
    pub process_results: Vec<StepResult>,
    /// Set once the document has been routed to a dead-letter queue.
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub exception: Option<SerializableException>,
}

impl PipelineStatus {
    pub fn new(process_id: impl Into<String>, steps: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            process_id: process_id.into(),
            creation_time: Some(now),
            last_updated_time: Some(now),
            remaining_steps: steps.clone(),
            completed: steps.is_empty(),
            steps,
            ..Default::default()
        }
    }

    /// Hands the document to `name`.
    pub fn begin_step(&mut self, name: &str) -> Result<(), PipelineError> {
        self.ensure_step(name)?;
        self.active_step = Some(name.to_string());
        Ok(())
    }

    /// Records `name` as done. Idempotent: a redelivered message that completes
    /// the same step twice only refreshes the timestamp.
    pub fn complete_step(&mut self, name: &str) -> Result<(), PipelineError> {
        self.ensure_step(name)?;
        self.touch();

        if self.completed_steps.iter().any(|s| s == name) {
            return Ok(());
        }

        self.completed_steps.push(name.to_string());
        self.remaining_steps.retain(|s| s != name);
        self.completed = self.remaining_steps.is_empty();
        Ok(())
    }

    fn ensure_step(&self, name: &str) -> Result<(), PipelineError> {
        if self.steps.iter().any(|s| s == name) {
            Ok(())
        } else {
            Err(PipelineError::UnknownStep {
                step: name.to_string(),
                steps: self.steps.clone(),
            })
        }
    }

    /// Inserts `result`, replacing any existing entry for the same step.
    pub fn add_step_result(&mut self, result: StepResult) {
        match self
            .process_results
            .iter_mut()
            .find(|existing| existing.step_name == result.step_name)
        {
            Some(existing) => *existing = result,
            None => self.process_results.push(result),
        }
    }

    pub fn get_step_result(&self, name: &str) -> Option<&StepResult> {
        self.process_results.iter().find(|r| r.step_name == name)
    }

    /// Result of the most recently completed step.
    pub fn get_previous_step_result(&self) -> Option<&StepResult> {
        self.completed_steps
            .last()
            .and_then(|step| self.get_step_result(step))
    }

    /// The step after `active_step`, or `None` when the active step is the last one.
    pub fn next_step(&self) -> Option<&str> {
        let active = self.active_step.as_deref()?;
        let index = self.steps.iter().position(|s| s == active)?;
        self.steps.get(index + 1).map(String::as_str)
    }

    /// Marks the document as permanently failed.
    pub fn mark_failed(&mut self, exception: SerializableException) {
        self.failed = true;
        self.exception = Some(exception);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_updated_time = Some(Utc::now());
    }
}
