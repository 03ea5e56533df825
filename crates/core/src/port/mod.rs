// Port Layer - Interfaces for external dependencies

pub mod agent_api;
pub mod process_control;
pub mod time_provider; // For deterministic testing
pub mod uploader;

// Re-exports
pub use agent_api::{AgentApi, Annotation, ApiError, RegisteredBatch};
pub use process_control::{ProcessControl, ProcessError};
pub use time_provider::{SystemTimeProvider, TimeProvider};
pub use uploader::{Destination, UploadError, Uploader, UploaderFactory};
