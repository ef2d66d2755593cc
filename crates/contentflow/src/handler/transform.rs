use serde_json::{json, Value};

use super::{StepContext, StepError, StepHandler};

/// Pass-through step kept as a slot for format conversion. Leaves the
/// document untouched.
pub struct TransformHandler;

impl StepHandler for TransformHandler {
    fn execute(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        log::debug!("Transform passes process {} through", ctx.process_id());
        Ok(json!({ "result": "success" }))
    }
}
