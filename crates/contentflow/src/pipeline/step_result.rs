use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A failure captured as data so it travels with the pipeline state instead
/// of only living in worker memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SerializableException {
    /// Type name of the error (e.g. `StepError`).
    pub exception_type: String,
    pub message: String,
    /// The rendered `source()` chain, one cause per line.
    #[serde(default)]
    pub stack_trace: String,
    /// Message of the immediate cause, if any.
    #[serde(default)]
    pub inner_exception: Option<String>,
    /// The step that raised the error.
    #[serde(default)]
    pub source: Option<String>,
}

impl SerializableException {
    pub fn from_error<E>(error: &E, step: Option<&str>) -> Self
    where
        E: std::error::Error + ?Sized,
    {
        let mut chain = Vec::new();
        let mut cause = error.source();
        while let Some(err) = cause {
            chain.push(err.to_string());
            cause = err.source();
        }

        Self {
            exception_type: short_type_name::<E>(),
            message: error.to_string(),
            stack_trace: chain
                .iter()
                .enumerate()
                .map(|(depth, msg)| format!("{}: {}", depth, msg))
                .collect::<Vec<_>>()
                .join("\n"),
            inner_exception: chain.first().cloned(),
            source: step.map(str::to_string),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "message": self.message }))
    }
}

fn short_type_name<E: ?Sized>() -> String {
    let full = std::any::type_name::<E>();
    // Strip module paths but keep generic arguments readable.
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Output of one step execution attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    #[serde(default)]
    pub process_id: String,
    #[serde(default)]
    pub step_name: String,
    /// Opaque, handler-defined payload.
    #[serde(default)]
    pub result: Value,
    /// Wall-clock time of the attempt, `HH:MM:SS.mmm`.
    #[serde(default)]
    pub elapsed: Option<String>,
    #[serde(default)]
    pub exception: Option<SerializableException>,
}

impl StepResult {
    pub fn success(process_id: &str, step_name: &str, result: Value) -> Self {
        Self {
            process_id: process_id.to_string(),
            step_name: step_name.to_string(),
            result,
            elapsed: None,
            exception: None,
        }
    }

    pub fn error(process_id: &str, step_name: &str, exception: SerializableException) -> Self {
        Self::failure(process_id, step_name, "error", exception)
    }

    pub fn dead_lettered(
        process_id: &str,
        step_name: &str,
        exception: SerializableException,
    ) -> Self {
        Self::failure(process_id, step_name, "moved to dead letter queue", exception)
    }

    fn failure(
        process_id: &str,
        step_name: &str,
        outcome: &str,
        exception: SerializableException,
    ) -> Self {
        Self {
            process_id: process_id.to_string(),
            step_name: step_name.to_string(),
            result: json!({ "result": outcome, "error": exception.to_value() }),
            elapsed: None,
            exception: Some(exception),
        }
    }

    pub fn with_elapsed(mut self, elapsed: String) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    pub fn is_error(&self) -> bool {
        self.exception.is_some()
    }
}
