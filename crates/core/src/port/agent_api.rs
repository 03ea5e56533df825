// Agent API Port
// Boundary to the build-orchestration backend (artifact registration, status, annotations)

use crate::domain::{Artifact, ArtifactId, ArtifactState, UploadInstructions};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// HTTP statuses that will fail the same way on every attempt
const UNRECOVERABLE_STATUSES: [u16; 4] = [400, 401, 404, 422];

/// Backend API errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{method} {url}: {status} {message}")]
    Status {
        method: String,
        url: String,
        status: u16,
        message: String,
    },

    #[error("Decode error: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when retrying cannot help (validation, auth, missing job)
    pub fn is_unrecoverable(&self) -> bool {
        self.status()
            .is_some_and(|s| UNRECOVERABLE_STATUSES.contains(&s))
    }
}

/// Result of registering a batch of artifacts
#[derive(Debug, Clone, Default)]
pub struct RegisteredBatch {
    /// One ID per submitted artifact, in submission order
    pub artifact_ids: Vec<ArtifactId>,
    /// Present when the backend hosts the uploads itself
    pub upload_instructions: Option<UploadInstructions>,
}

/// Build annotation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub body: String,
    pub style: Option<String>,
    pub context: Option<String>,
    pub append: bool,
}

/// Agent API trait
///
/// Implementations:
/// - HttpAgentApi: JSON over HTTP (infra-http)
/// - MockAgentApi: in-memory fake for tests
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Register artifacts in one batch call
    ///
    /// `destination` is the raw upload destination the artifacts are headed for.
    async fn create_artifacts(
        &self,
        job_id: &str,
        artifacts: &[Artifact],
        destination: &str,
    ) -> Result<RegisteredBatch, ApiError>;

    /// Report new artifact states in one batch call
    async fn update_artifact_states(
        &self,
        job_id: &str,
        states: &HashMap<ArtifactId, ArtifactState>,
    ) -> Result<(), ApiError>;

    /// Create or update a build annotation
    async fn annotate(&self, job_id: &str, annotation: &Annotation) -> Result<(), ApiError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn status_error(status: u16) -> ApiError {
        ApiError::Status {
            method: "POST".to_string(),
            url: "mock://api".to_string(),
            status,
            message: "mock failure".to_string(),
        }
    }

    /// In-memory backend
    #[derive(Default)]
    pub struct MockAgentApi {
        registration_status: Option<u16>,
        update_failures: AtomicUsize,
        annotation_status: Option<u16>,
        upload_instructions: Option<UploadInstructions>,
        registration_calls: AtomicUsize,
        update_calls: AtomicUsize,
        annotation_calls: AtomicUsize,
        registered: Mutex<Vec<Artifact>>,
        updates: Mutex<Vec<HashMap<ArtifactId, ArtifactState>>>,
        annotations: Mutex<Vec<Annotation>>,
    }

    impl MockAgentApi {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every registration fails with this HTTP status
        pub fn failing_registration(status: u16) -> Self {
            Self {
                registration_status: Some(status),
                ..Self::default()
            }
        }

        /// Every annotation fails with this HTTP status
        pub fn failing_annotation(status: u16) -> Self {
            Self {
                annotation_status: Some(status),
                ..Self::default()
            }
        }

        /// The first `n` state updates fail with a transport error
        pub fn with_update_failures(self, n: usize) -> Self {
            self.update_failures.store(n, Ordering::SeqCst);
            self
        }

        pub fn with_upload_instructions(mut self, instructions: UploadInstructions) -> Self {
            self.upload_instructions = Some(instructions);
            self
        }

        pub fn registration_calls(&self) -> usize {
            self.registration_calls.load(Ordering::SeqCst)
        }

        pub fn update_calls(&self) -> usize {
            self.update_calls.load(Ordering::SeqCst)
        }

        pub fn annotation_calls(&self) -> usize {
            self.annotation_calls.load(Ordering::SeqCst)
        }

        pub fn registered(&self) -> Vec<Artifact> {
            self.registered.lock().unwrap().clone()
        }

        /// Successfully flushed update batches, in order
        pub fn updates(&self) -> Vec<HashMap<ArtifactId, ArtifactState>> {
            self.updates.lock().unwrap().clone()
        }

        /// All flushed states merged into one map
        pub fn flushed_states(&self) -> HashMap<ArtifactId, ArtifactState> {
            self.updates
                .lock()
                .unwrap()
                .iter()
                .flat_map(|batch| batch.iter().map(|(k, v)| (k.clone(), *v)))
                .collect()
        }

        pub fn annotations(&self) -> Vec<Annotation> {
            self.annotations.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AgentApi for MockAgentApi {
        async fn create_artifacts(
            &self,
            _job_id: &str,
            artifacts: &[Artifact],
            _destination: &str,
        ) -> Result<RegisteredBatch, ApiError> {
            let call = self.registration_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.registration_status {
                return Err(status_error(status));
            }

            let mut registered = self.registered.lock().unwrap();
            let offset = registered.len();
            registered.extend(artifacts.iter().cloned());

            Ok(RegisteredBatch {
                artifact_ids: (0..artifacts.len())
                    .map(|i| format!("artifact-{}-{}", call, offset + i))
                    .collect(),
                upload_instructions: self.upload_instructions.clone(),
            })
        }

        async fn update_artifact_states(
            &self,
            _job_id: &str,
            states: &HashMap<ArtifactId, ArtifactState>,
        ) -> Result<(), ApiError> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);

            let remaining = self.update_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.update_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(ApiError::Transport("mock connection reset".to_string()));
            }

            self.updates.lock().unwrap().push(states.clone());
            Ok(())
        }

        async fn annotate(&self, _job_id: &str, annotation: &Annotation) -> Result<(), ApiError> {
            self.annotation_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(status) = self.annotation_status {
                return Err(status_error(status));
            }
            self.annotations.lock().unwrap().push(annotation.clone());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_classification() {
        let status = |s| ApiError::Status {
            method: "POST".to_string(),
            url: "http://x".to_string(),
            status: s,
            message: String::new(),
        };

        assert!(status(422).is_unrecoverable());
        assert!(status(401).is_unrecoverable());
        assert!(!status(500).is_unrecoverable());
        assert!(!status(429).is_unrecoverable());
        assert!(!ApiError::Transport("reset".to_string()).is_unrecoverable());
    }
}
