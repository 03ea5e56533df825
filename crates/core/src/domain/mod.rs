// Domain Layer - Entities and value types

pub mod artifact;
pub mod error;
pub mod log_line;
pub mod output;
pub mod process;

// Re-exports
pub use artifact::{Artifact, ArtifactId, ArtifactState, UploadInstructions, ARTIFACT_PATH_DELIMITER};
pub use error::DomainError;
pub use log_line::{format_timestamp, LogLine};
pub use output::OutputBuffer;
pub use process::{DoneSignal, Lifecycle, ProcessHandle};
