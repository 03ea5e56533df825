// Application Layer - Use Cases and Business Logic

pub mod annotate;
pub mod artifact_upload;
pub mod collector;
pub mod line_scanner;
pub mod pool;
pub mod retry;
pub mod upload;

// Re-exports
pub use annotate::AnnotationService;
pub use artifact_upload::ArtifactUploadService;
pub use collector::ArtifactCollector;
pub use line_scanner::{LineHooks, LineScanner, ScanSummary};
pub use pool::WorkerPool;
pub use retry::{retry, RetryAttempt, RetryConfig};
pub use upload::{UploadConfig, UploadCoordinator};
