use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Step '{step}' is not part of pipeline {steps:?}")]
    UnknownStep { step: String, steps: Vec<String> },

    #[error("Message body is not a valid pipeline state: {0}")]
    InvalidMessage(#[source] serde_json::Error),

    #[error("Message body is not valid UTF-8 after base64 decoding")]
    InvalidEncoding(#[source] std::string::FromUtf8Error),

    #[error("Failed to serialize pipeline state: {0}")]
    Serialize(#[source] serde_json::Error),
}
