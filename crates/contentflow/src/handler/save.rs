use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::db::{process_repo, ProcessRecord, ProcessResultUpdate};
use crate::pipeline::{format_elapsed, sum_elapsed, ArtifactType};

use super::evaluate::DataExtractionResult;
use super::{StepContext, StepError, StepHandler, EVALUATE_STEP};

pub const STEP_OUTPUTS_FILE: &str = "step_outputs.json";
pub const SAVE_OUTPUT_FILE: &str = "save_output.json";

/// The artifact one step left behind, with the time it took.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepOutput {
    pub step_name: String,
    pub processed_time: Option<String>,
    pub step_result: Value,
}

/// Final summary of a processed document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SavedContent {
    pub process_id: String,
    pub processed_file_name: Option<String>,
    pub processed_time: String,
    pub entity_score: f64,
    pub schema_score: f64,
    pub min_extracted_entity_score: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub result: Value,
    pub confidence: Value,
}

/// Collects every step's output, scores the document and records the result
/// in the process database.
pub struct SaveHandler;

impl SaveHandler {
    fn collect_step_outputs(ctx: &StepContext<'_>) -> Result<Vec<StepOutput>, StepError> {
        let status = &ctx.state.pipeline_status;
        let mut outputs = Vec::new();

        for step in status.steps.iter().filter(|s| s.as_str() != ctx.step) {
            let Some(result) = status.get_step_result(step) else {
                continue;
            };

            let artifact = ctx.state.files.iter().rev().find(|f| {
                f.processed_by.as_deref() == Some(step.as_str())
                    && f.artifact_type != ArtifactType::SourceContent
            });
            let step_result = match artifact {
                Some(file) => {
                    let bytes = ctx.app.storage.download(ctx.process_id(), &file.name)?;
                    serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                        Value::String(String::from_utf8_lossy(&bytes).into_owned())
                    })
                }
                None => result.result.clone(),
            };

            outputs.push(StepOutput {
                step_name: step.clone(),
                processed_time: result.elapsed.clone(),
                step_result,
            });
        }

        Ok(outputs)
    }
}

/// Share of compared fields that received a non-zero confidence, to three decimals.
pub fn schema_score(evaluation: &DataExtractionResult) -> f64 {
    let rows = evaluation.comparison_result.items.len();
    if evaluation.confidence.total_evaluated_fields_count == 0 || rows == 0 {
        return 0.0;
    }
    let scored = rows.saturating_sub(evaluation.confidence.zero_confidence_fields_count);
    (scored as f64 / rows as f64 * 1000.0).round() / 1000.0
}

impl StepHandler for SaveHandler {
    fn execute(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        let evaluation: DataExtractionResult =
            match ctx.state.find_output_file(EVALUATE_STEP, ArtifactType::ScoreMergedData) {
                Some(_) => ctx.download_output_json(EVALUATE_STEP, ArtifactType::ScoreMergedData)?,
                None => {
                    log::warn!(
                        "Process {} has no evaluation output, saving without scores",
                        ctx.process_id()
                    );
                    DataExtractionResult::default()
                }
            };

        let outputs = Self::collect_step_outputs(ctx)?;
        let processed_time = format_elapsed(sum_elapsed(
            ctx.state
                .pipeline_status
                .process_results
                .iter()
                .filter_map(|r| r.elapsed.as_deref()),
        ));

        let (file_name, mime_type) = match ctx.source_file() {
            Ok(file) => (Some(file.name.clone()), file.mime_type.clone()),
            Err(_) => (None, None),
        };

        let saved = SavedContent {
            process_id: ctx.process_id().to_string(),
            processed_file_name: file_name.clone(),
            processed_time: processed_time.clone(),
            entity_score: evaluation.confidence.overall_confidence,
            schema_score: schema_score(&evaluation),
            min_extracted_entity_score: evaluation.confidence.min_extracted_field_confidence,
            prompt_tokens: evaluation.prompt_tokens,
            completion_tokens: evaluation.completion_tokens,
            result: evaluation.extracted_result.clone(),
            confidence: evaluation.confidence.to_value(),
        };

        ctx.store_json_artifact(
            STEP_OUTPUTS_FILE,
            ArtifactType::SavedContent,
            &outputs,
            "Step outputs have been collected",
        )?;
        let file = ctx.store_json_artifact(
            SAVE_OUTPUT_FILE,
            ArtifactType::SavedContent,
            &saved,
            "Process result has been saved",
        )?;

        let update = ProcessResultUpdate {
            processed_time: Some(processed_time),
            entity_score: saved.entity_score,
            schema_score: saved.schema_score,
            min_extracted_entity_score: saved.min_extracted_entity_score,
            prompt_tokens: saved.prompt_tokens as i64,
            completion_tokens: saved.completion_tokens as i64,
            result: Some(saved.result.to_string()),
            confidence: Some(saved.confidence.to_string()),
            process_output: Some(json!(outputs).to_string()),
        };

        let db = &ctx.app.db;
        if !process_repo::save_result(db, &saved.process_id, &update)? {
            let record =
                ProcessRecord::new(&saved.process_id, file_name.as_deref(), mime_type.as_deref());
            process_repo::insert(db, &record)?;
            process_repo::save_result(db, &saved.process_id, &update)?;
        }

        Ok(json!({ "result": "success", "file_name": file.name }))
    }
}
