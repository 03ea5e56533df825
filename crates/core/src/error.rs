// Central Error Type for the Agent

use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid glob pattern '{pattern}': {reason}")]
    Glob { pattern: String, reason: String },

    #[error("API error: {0}")]
    Api(#[from] crate::port::ApiError),

    #[error("Upload error: {0}")]
    Upload(#[from] crate::port::UploadError),

    #[error("Process error: {0}")]
    Process(#[from] crate::port::ProcessError),

    #[error("There were errors with uploading {failed} of {total} artifacts")]
    PartialUpload { failed: usize, total: usize },

    #[error("Failed to report artifact states: {0}")]
    StatusReport(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AgentError
pub type Result<T> = std::result::Result<T, AgentError>;
