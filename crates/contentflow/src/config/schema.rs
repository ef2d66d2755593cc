use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::confidence::ScoreResolver;
use crate::pipeline::ArtifactType;
use crate::queue::{MessageEncoding, DEFAULT_PIPELINE_PREFIX};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_pipeline_prefix")]
    pub pipeline_prefix: String,
    pub process_steps: Vec<String>,
    #[serde(default = "default_storage_directory")]
    pub storage_directory: String,
    /// `None` uses `~/.contentflow/contentflow.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub external_steps: HashMap<String, ExternalStepConfig>,
    /// Verbose per-message logging.
    #[serde(default)]
    pub show_information: bool,
}

fn default_pipeline_prefix() -> String {
    DEFAULT_PIPELINE_PREFIX.to_string()
}

fn default_storage_directory() -> String {
    dirs::home_dir()
        .map(|h| h.join(".contentflow").join("storage"))
        .unwrap_or_else(|| PathBuf::from("contentflow-storage"))
        .to_string_lossy()
        .into_owned()
}

pub fn default_process_steps() -> Vec<String> {
    ["extract", "map", "evaluate", "save"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pipeline_prefix: default_pipeline_prefix(),
            process_steps: default_process_steps(),
            storage_directory: default_storage_directory(),
            database_path: None,
            queue: QueueConfig::default(),
            supervisor: SupervisorConfig::default(),
            logging: LoggingConfig::default(),
            evaluation: EvaluationConfig::default(),
            external_steps: HashMap::new(),
            show_information: false,
        }
    }
}

impl Config {
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }

    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(&self.storage_directory)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Idle sleep between polls of an empty queue.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Lease taken on receive; how long a step may work before the message reappears.
    #[serde(default = "default_process_timeout_secs")]
    pub process_timeout_secs: u64,
    /// Delay before a failed message becomes eligible for redelivery.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// A message is dead-lettered once it has been delivered more often than this.
    #[serde(default = "default_dead_letter_threshold")]
    pub dead_letter_threshold: u32,
    #[serde(default)]
    pub message_encoding: MessageEncoding,
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_process_timeout_secs() -> u64 {
    300
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_dead_letter_threshold() -> u32 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            process_timeout_secs: default_process_timeout_secs(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            dead_letter_threshold: default_dead_letter_threshold(),
            message_encoding: MessageEncoding::default(),
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn process_timeout(&self) -> Duration {
        Duration::from_secs(self.process_timeout_secs)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorMode {
    /// One OS thread per step inside the host process.
    #[default]
    Thread,
    /// One child process per step.
    Process,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub mode: SupervisorMode,
    #[serde(default = "default_supervisor_poll_ms")]
    pub poll_interval_ms: u64,
}

fn default_supervisor_poll_ms() -> u64 {
    1000
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            mode: SupervisorMode::default(),
            poll_interval_ms: default_supervisor_poll_ms(),
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default)]
    pub score_resolver: ScoreResolver,
}

fn default_confidence_threshold() -> f64 {
    0.8
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            score_resolver: ScoreResolver::default(),
        }
    }
}

/// A step implemented by an external program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalStepConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_external_artifact")]
    pub artifact_type: ArtifactType,
    /// Defaults to `<step>_output.json`.
    #[serde(default)]
    pub output_file_name: Option<String>,
}

fn default_external_artifact() -> ArtifactType {
    ArtifactType::ExtractedContent
}

impl Default for ExternalStepConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: Vec::new(),
            artifact_type: default_external_artifact(),
            output_file_name: None,
        }
    }
}

impl ExternalStepConfig {
    pub fn output_file_name(&self, step: &str) -> String {
        self.output_file_name
            .clone()
            .unwrap_or_else(|| format!("{}_output.json", step))
    }
}
