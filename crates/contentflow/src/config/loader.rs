use std::collections::HashSet;
use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;
use crate::queue::{dead_letter_queue_name, queue_name, validate_queue_name};

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub const ENV_PROCESS_STEPS: &str = "CONTENTFLOW_PROCESS_STEPS";
pub const ENV_LOG_LEVEL: &str = "CONTENTFLOW_LOG_LEVEL";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Loads, validates and applies environment overrides.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut config = parse_config(&content)?;
    apply_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config)?;
    Ok(config)
}

/// Parses and validates a config document. Environment overrides are not applied.
pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config = parse_config(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;
    validate_schema(&json_value)?;
    Ok(serde_json::from_value(json_value)?)
}

/// Applies `CONTENTFLOW_PROCESS_STEPS` (comma separated) and `CONTENTFLOW_LOG_LEVEL`.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(steps) = lookup(ENV_PROCESS_STEPS) {
        let steps: Vec<String> = steps
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !steps.is_empty() {
            log::info!("Process steps overridden from {}: {:?}", ENV_PROCESS_STEPS, steps);
            config.process_steps = steps;
        }
    }

    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        let level = level.trim().to_lowercase();
        if !level.is_empty() {
            config.logging.level = level;
        }
    }
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.process_steps.is_empty() {
        return Err(ConfigError::Validation {
            message: "process_steps must not be empty".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for step in &config.process_steps {
        if !seen.insert(step.as_str()) {
            return Err(ConfigError::Validation {
                message: format!("Step '{}' is listed more than once", step),
            });
        }
        let live = queue_name(&config.pipeline_prefix, step);
        validate_queue_name(&dead_letter_queue_name(&live)).map_err(|_| {
            ConfigError::Validation {
                message: format!(
                    "Step '{}' does not produce a valid queue name with prefix '{}'",
                    step, config.pipeline_prefix
                ),
            }
        })?;
    }

    if config.queue.dead_letter_threshold < 1 {
        return Err(ConfigError::Validation {
            message: "queue.dead_letter_threshold must be at least 1".to_string(),
        });
    }
    if config.queue.poll_interval_secs == 0 || config.queue.process_timeout_secs == 0 {
        return Err(ConfigError::Validation {
            message: "queue.poll_interval_secs and queue.process_timeout_secs must be positive"
                .to_string(),
        });
    }
    if config.supervisor.poll_interval_ms == 0 {
        return Err(ConfigError::Validation {
            message: "supervisor.poll_interval_ms must be positive".to_string(),
        });
    }

    let threshold = config.evaluation.confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(ConfigError::Validation {
            message: format!(
                "evaluation.confidence_threshold must be within [0, 1], got {}",
                threshold
            ),
        });
    }

    if !LOG_LEVELS.contains(&config.logging.level.as_str()) {
        return Err(ConfigError::Validation {
            message: format!("Unknown log level '{}'", config.logging.level),
        });
    }

    for (step, external) in &config.external_steps {
        if external.program.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("external_steps.{}.program must not be empty", step),
            });
        }
        if !config.process_steps.contains(step) {
            log::warn!("External step '{}' is configured but not in process_steps", step);
        }
    }

    Ok(())
}
