// Uploader Port
// Pluggable transports that move artifact bytes to their destination

use crate::domain::Artifact;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

const S3_SCHEME: &str = "s3://";
const GCS_SCHEME: &str = "gs://";

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid upload destination: '{0}'. Only s3:// and gs:// upload destinations are allowed. Did you forget to surround your artifact upload pattern in double quotes?")]
    InvalidDestination(String),

    #[error("Uploader setup failed: {0}")]
    Setup(String),

    #[error("Missing upload instructions for artifact {0}")]
    MissingInstructions(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upload rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
}

/// Where artifacts are uploaded to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Upload through the backend's own form endpoint
    BackendHosted,
    S3 { bucket: String, prefix: String },
    GoogleCloudStorage { bucket: String, prefix: String },
}

impl Destination {
    /// Pick a destination from its scheme; empty means backend-hosted
    pub fn parse(raw: &str) -> Result<Self, UploadError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Destination::BackendHosted);
        }

        if let Some(rest) = trimmed.strip_prefix(S3_SCHEME) {
            let (bucket, prefix) = split_bucket(rest, raw)?;
            return Ok(Destination::S3 { bucket, prefix });
        }

        if let Some(rest) = trimmed.strip_prefix(GCS_SCHEME) {
            let (bucket, prefix) = split_bucket(rest, raw)?;
            return Ok(Destination::GoogleCloudStorage { bucket, prefix });
        }

        Err(UploadError::InvalidDestination(raw.to_string()))
    }

    /// Object key for an artifact path under this destination's prefix
    pub fn object_key(&self, artifact_path: &str) -> String {
        match self {
            Destination::BackendHosted => artifact_path.to_string(),
            Destination::S3 { prefix, .. } | Destination::GoogleCloudStorage { prefix, .. } => {
                if prefix.is_empty() {
                    artifact_path.to_string()
                } else {
                    format!("{}/{}", prefix, artifact_path)
                }
            }
        }
    }
}

fn split_bucket(rest: &str, raw: &str) -> Result<(String, String), UploadError> {
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(UploadError::InvalidDestination(raw.to_string()));
    }
    Ok((bucket.to_string(), prefix.trim_matches('/').to_string()))
}

/// Uploader strategy
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Destination URL for an artifact, computed before registration
    fn url(&self, artifact: &Artifact) -> Option<String>;

    /// Upload one registered artifact
    async fn upload(&self, artifact: &Artifact) -> Result<(), UploadError>;
}

/// Builds the uploader for a destination
pub trait UploaderFactory: Send + Sync {
    fn create(&self, destination: &Destination) -> Result<Arc<dyn Uploader>, UploadError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Uploader that fails for selected paths and tracks concurrency
    #[derive(Default)]
    pub struct MockUploader {
        failing_paths: HashSet<String>,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        attempts: Mutex<HashMap<String, usize>>,
    }

    impl MockUploader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing_for<I, S>(paths: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                failing_paths: paths.into_iter().map(Into::into).collect(),
                ..Self::default()
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub fn attempts(&self, path: &str) -> usize {
            self.attempts
                .lock()
                .unwrap()
                .get(path)
                .copied()
                .unwrap_or(0)
        }
    }

    #[async_trait]
    impl Uploader for MockUploader {
        fn url(&self, artifact: &Artifact) -> Option<String> {
            Some(format!("mock://bucket/{}", artifact.path))
        }

        async fn upload(&self, artifact: &Artifact) -> Result<(), UploadError> {
            *self
                .attempts
                .lock()
                .unwrap()
                .entry(artifact.path.clone())
                .or_insert(0) += 1;

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if self.failing_paths.contains(&artifact.path) {
                return Err(UploadError::Transport(format!(
                    "mock upload of {} failed",
                    artifact.path
                )));
            }
            Ok(())
        }
    }

    /// Factory that hands out one shared uploader and records what it was asked for
    pub struct MockUploaderFactory {
        uploader: Arc<MockUploader>,
        requested: Mutex<Vec<Destination>>,
    }

    impl MockUploaderFactory {
        pub fn new(uploader: Arc<MockUploader>) -> Self {
            Self {
                uploader,
                requested: Mutex::new(Vec::new()),
            }
        }

        pub fn requested(&self) -> Vec<Destination> {
            self.requested.lock().unwrap().clone()
        }
    }

    impl UploaderFactory for MockUploaderFactory {
        fn create(&self, destination: &Destination) -> Result<Arc<dyn Uploader>, UploadError> {
            self.requested.lock().unwrap().push(destination.clone());
            Ok(self.uploader.clone())
        }
    }
}
