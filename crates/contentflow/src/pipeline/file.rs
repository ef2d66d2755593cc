use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What role a file plays in a document's journey.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    #[default]
    Undefined,
    SourceContent,
    ConvertedContent,
    ExtractedContent,
    SchemaMappedData,
    ScoreMergedData,
    SavedContent,
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactType::Undefined => write!(f, "undefined"),
            ArtifactType::SourceContent => write!(f, "source_content"),
            ArtifactType::ConvertedContent => write!(f, "converted_content"),
            ArtifactType::ExtractedContent => write!(f, "extracted_content"),
            ArtifactType::SchemaMappedData => write!(f, "schema_mapped_data"),
            ArtifactType::ScoreMergedData => write!(f, "score_merged_data"),
            ArtifactType::SavedContent => write!(f, "saved_content"),
        }
    }
}

/// A timestamped note attached to a file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineLogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub message: String,
}

impl PipelineLogEntry {
    pub fn new(source: &str, message: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            source: source.to_string(),
            message: message.to_string(),
        }
    }
}

/// A file attached to a process: the submitted source or an artifact a step produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileDetail {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub process_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub artifact_type: ArtifactType,
    /// Step that produced the file (`None` for files the producer attached).
    #[serde(default)]
    pub processed_by: Option<String>,
    /// Append-only.
    #[serde(default)]
    pub log_entries: Vec<PipelineLogEntry>,
}

impl FileDetail {
    pub fn new(
        process_id: &str,
        name: &str,
        artifact_type: ArtifactType,
        processed_by: Option<&str>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            process_id: process_id.to_string(),
            name: name.to_string(),
            size: None,
            mime_type: detect_mime_type(name),
            artifact_type,
            processed_by: processed_by.map(str::to_string),
            log_entries: Vec::new(),
        }
    }

    pub fn add_log_entry(&mut self, source: &str, message: &str) -> &mut Self {
        self.log_entries.push(PipelineLogEntry::new(source, message));
        self
    }
}

/// Detects MIME type from a file name. Returns `None` for unknown extensions.
pub fn detect_mime_type(name: &str) -> Option<String> {
    mime_guess::from_path(Path::new(name))
        .first()
        .map(|m| m.to_string())
}
