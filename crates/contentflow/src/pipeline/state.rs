use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::error::PipelineError;
use super::file::{ArtifactType, FileDetail};
use super::status::PipelineStatus;

/// Everything known about one document: its progress and its files. This is
/// the queue message body and the content of `process-status.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineState {
    #[serde(alias = "ProcessId")]
    pub process_id: String,
    #[serde(alias = "PipelineStatus")]
    pub pipeline_status: PipelineStatus,
    #[serde(default, alias = "Files")]
    pub files: Vec<FileDetail>,
}

impl PipelineState {
    pub fn new(process_id: impl Into<String>, steps: Vec<String>) -> Self {
        let process_id = process_id.into();
        Self {
            pipeline_status: PipelineStatus::new(process_id.clone(), steps),
            process_id,
            files: Vec::new(),
        }
    }

    /// Parses a queue message body. Bodies that are strict base64 are decoded first.
    pub fn from_message_body(body: &str) -> Result<Self, PipelineError> {
        let trimmed = body.trim();
        let json = match decode_base64(trimmed) {
            Some(bytes) => String::from_utf8(bytes).map_err(PipelineError::InvalidEncoding)?,
            None => trimmed.to_string(),
        };
        serde_json::from_str(&json).map_err(PipelineError::InvalidMessage)
    }

    pub fn to_json(&self) -> Result<String, PipelineError> {
        serde_json::to_string(self).map_err(PipelineError::Serialize)
    }

    /// Creates a file entry tagged with the active step and returns it for
    /// further annotation.
    pub fn add_file(&mut self, name: &str, artifact_type: ArtifactType) -> &mut FileDetail {
        let file = FileDetail::new(
            &self.process_id,
            name,
            artifact_type,
            self.pipeline_status.active_step.as_deref(),
        );
        self.files.push(file);
        let last = self.files.len() - 1;
        &mut self.files[last]
    }

    pub fn source_files(&self) -> impl Iterator<Item = &FileDetail> {
        self.files
            .iter()
            .filter(|f| f.artifact_type == ArtifactType::SourceContent)
    }

    /// Most recent file of `artifact_type` produced by `processed_by`.
    pub fn find_output_file(
        &self,
        processed_by: &str,
        artifact_type: ArtifactType,
    ) -> Option<&FileDetail> {
        self.files.iter().rev().find(|f| {
            f.artifact_type == artifact_type && f.processed_by.as_deref() == Some(processed_by)
        })
    }

    pub fn active_step(&self) -> Option<&str> {
        self.pipeline_status.active_step.as_deref()
    }
}

fn decode_base64(body: &str) -> Option<Vec<u8>> {
    if body.is_empty() {
        return None;
    }
    let decoded = STANDARD.decode(body).ok()?;
    (STANDARD.encode(&decoded) == body).then_some(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> PipelineState {
        let mut state = PipelineState::new(
            "p1",
            vec!["extract".to_string(), "map".to_string()],
        );
        state
            .files
            .push(FileDetail::new("p1", "doc.pdf", ArtifactType::SourceContent, None));
        state
    }

    #[test]
    fn test_add_file_tags_active_step() {
        let mut state = sample_state();
        state.pipeline_status.begin_step("extract").unwrap();
        let file = state.add_file("extract_output.json", ArtifactType::ExtractedContent);
        file.add_log_entry("extract", "written");

        let found = state
            .find_output_file("extract", ArtifactType::ExtractedContent)
            .unwrap();
        assert_eq!(found.name, "extract_output.json");
        assert_eq!(found.log_entries.len(), 1);
        assert!(state.find_output_file("map", ArtifactType::ExtractedContent).is_none());
    }

    #[test]
    fn test_source_files() {
        let state = sample_state();
        let sources: Vec<_> = state.source_files().collect();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].name, "doc.pdf");
    }

    #[test]
    fn test_message_body_plain_and_base64() {
        let state = sample_state();
        let json = state.to_json().unwrap();

        let parsed = PipelineState::from_message_body(&json).unwrap();
        assert_eq!(parsed, state);

        let encoded = STANDARD.encode(json.as_bytes());
        let parsed = PipelineState::from_message_body(&encoded).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_message_body_from_producer_shape() {
        let body = r#"{
            "process_id": "abc",
            "files": [{
                "process_id": "abc",
                "id": "f1",
                "name": "claim.pdf",
                "size": 1024,
                "mime_type": "application/pdf",
                "artifact_type": "source_content",
                "processed_by": "API"
            }],
            "pipeline_status": {
                "process_id": "abc",
                "schema_id": "s1",
                "metadata_id": "m1",
                "creation_time": "2025-03-01T10:00:00.123456Z",
                "steps": ["extract", "map", "evaluate", "save"],
                "remaining_steps": ["extract", "map", "evaluate", "save"],
                "completed_steps": []
            }
        }"#;
        let state = PipelineState::from_message_body(body).unwrap();
        assert_eq!(state.pipeline_status.schema_id.as_deref(), Some("s1"));
        assert_eq!(state.files[0].size, Some(1024));
        assert_eq!(state.source_files().count(), 1);
    }

    #[test]
    fn test_invalid_body() {
        let err = PipelineState::from_message_body("not json").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidMessage(_)));
    }
}
