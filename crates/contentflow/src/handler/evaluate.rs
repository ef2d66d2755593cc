use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::confidence::{flatten_for_comparison, merge, ExtractionComparisonData, MergedConfidence};
use crate::pipeline::ArtifactType;

use super::{ScoredOutput, StepContext, StepError, StepHandler, EXTRACT_STEP, MAP_STEP};

pub const EVALUATE_OUTPUT_FILE: &str = "evaluate_output.json";

/// Everything the evaluation produced for one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataExtractionResult {
    pub extracted_result: Value,
    pub confidence: MergedConfidence,
    pub comparison_result: ExtractionComparisonData,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Scores the mapped result by merging the extract and map confidence trees.
pub struct EvaluateHandler;

impl StepHandler for EvaluateHandler {
    fn execute(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        let extracted: ScoredOutput =
            ctx.download_output_json(EXTRACT_STEP, ArtifactType::ExtractedContent)?;
        let mapped: ScoredOutput =
            ctx.download_output_json(MAP_STEP, ArtifactType::SchemaMappedData)?;

        let evaluation = &ctx.app.config.evaluation;
        let confidence = merge(
            &extracted.confidence,
            &mapped.confidence,
            evaluation.score_resolver,
        )?;
        let comparison = flatten_for_comparison(
            &mapped.result,
            &confidence.to_value(),
            evaluation.confidence_threshold,
        );

        log::debug!(
            "Process {}: {} fields evaluated, overall confidence {}",
            ctx.process_id(),
            confidence.total_evaluated_fields_count,
            confidence.overall_confidence
        );

        let result = DataExtractionResult {
            extracted_result: mapped.result,
            confidence,
            comparison_result: comparison,
            prompt_tokens: extracted.prompt_tokens + mapped.prompt_tokens,
            completion_tokens: extracted.completion_tokens + mapped.completion_tokens,
        };

        let file = ctx.store_json_artifact(
            EVALUATE_OUTPUT_FILE,
            ArtifactType::ScoreMergedData,
            &result,
            "Evaluation result has been added",
        )?;

        Ok(json!({ "result": "success", "file_name": file.name }))
    }
}
