//! Artifact upload coordination
//!
//! Registers a batch of collected artifacts, uploads them through a bounded
//! worker pool and keeps the backend informed of each artifact's final state.
//!
//! Upload tasks never talk to the backend about state themselves. They write
//! into a [`StateLedger`], and a single [`StatusReporter`] drains it on a fixed
//! cadence and flushes the changes as one batched update.

pub mod ledger;
pub mod reporter;

pub use ledger::StateLedger;
pub use reporter::{ReportSummary, StatusReporter};

use crate::application::pool::{WorkerPool, DEFAULT_POOL_CAPACITY};
use crate::application::retry::{retry, RetryConfig};
use crate::domain::{Artifact, ArtifactId, ArtifactState, DomainError};
use crate::error::{AgentError, Result};
use crate::port::{AgentApi, Destination, Uploader, UploaderFactory};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const UPLOAD_RETRY: RetryConfig = RetryConfig::new(10, Duration::from_secs(5));
pub const REGISTRATION_RETRY: RetryConfig = RetryConfig::new(10, Duration::from_secs(5));
pub const STATUS_RETRY: RetryConfig = RetryConfig::new(10, Duration::from_secs(5));
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Uploads in flight at once
    pub concurrency: usize,
    pub registration_retry: RetryConfig,
    pub upload_retry: RetryConfig,
    pub status_retry: RetryConfig,
    /// Status reporter poll cadence
    pub report_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_POOL_CAPACITY,
            registration_retry: REGISTRATION_RETRY,
            upload_retry: UPLOAD_RETRY,
            status_retry: STATUS_RETRY,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

pub struct UploadCoordinator {
    api: Arc<dyn AgentApi>,
    uploaders: Arc<dyn UploaderFactory>,
    job_id: String,
    config: UploadConfig,
}

impl UploadCoordinator {
    pub fn new(
        api: Arc<dyn AgentApi>,
        uploaders: Arc<dyn UploaderFactory>,
        job_id: impl Into<String>,
        config: UploadConfig,
    ) -> Self {
        Self {
            api,
            uploaders,
            job_id: job_id.into(),
            config,
        }
    }

    /// Register and upload `artifacts` to `destination`
    ///
    /// On return every artifact carries its ID, URL and terminal state. Fails
    /// with [`AgentError::PartialUpload`] if any artifact ended in error, but
    /// only after every other upload and state report has finished.
    pub async fn upload(&self, artifacts: &mut [Artifact], destination: &str) -> Result<()> {
        if artifacts.is_empty() {
            return Ok(());
        }

        let target = Destination::parse(destination)?;
        let uploader = self.uploaders.create(&target)?;

        for artifact in artifacts.iter_mut() {
            artifact.url = uploader.url(artifact);
        }

        self.register(artifacts, destination).await?;

        let total = artifacts.len();
        let ledger = Arc::new(StateLedger::new());
        let reporter = tokio::spawn(
            StatusReporter::new(
                Arc::clone(&self.api),
                self.job_id.clone(),
                Arc::clone(&ledger),
                total,
                self.config.report_interval,
                self.config.status_retry,
            )
            .run(),
        );

        let mut pool = WorkerPool::new(self.config.concurrency);
        for artifact in artifacts.iter() {
            let id = registered_id(artifact)?;
            let artifact = artifact.clone();
            let uploader = Arc::clone(&uploader);
            let ledger = Arc::clone(&ledger);
            let retry_config = self.config.upload_retry;

            pool.spawn(async move {
                let state = upload_one(uploader.as_ref(), &artifact, &id, &retry_config, &ledger).await;
                (id, state)
            })
            .await;
        }

        let (outcomes, crashed) = pool.wait().await;
        let mut states: HashMap<ArtifactId, ArtifactState> = outcomes.into_iter().collect();

        // Tasks that panicked never reported; they count as errors
        if crashed > 0 {
            for artifact in artifacts.iter() {
                let id = registered_id(artifact)?;
                if !states.contains_key(&id) {
                    ledger.report(id.clone(), ArtifactState::Error);
                    ledger.record_failure(format!("Upload of {} did not complete", artifact.path));
                    states.insert(id, ArtifactState::Error);
                }
            }
        }
        ledger.close();

        let summary = match reporter.await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Status reporter failed: {:?}", e);
                ReportSummary {
                    flushed: 0,
                    failed_batches: 1,
                }
            }
        };

        let mut failed = 0;
        for artifact in artifacts.iter_mut() {
            let id = registered_id(artifact)?;
            let state = states.get(&id).copied().unwrap_or(ArtifactState::Error);
            if state == ArtifactState::Error {
                failed += 1;
            }
            artifact.transition(state)?;
        }

        debug!(
            total,
            failed,
            flushed = summary.flushed,
            "Artifact upload finished"
        );

        if failed > 0 {
            return Err(AgentError::PartialUpload { failed, total });
        }
        if summary.failed_batches > 0 {
            return Err(AgentError::StatusReport(ledger.failures().join("; ")));
        }

        Ok(())
    }

    async fn register(&self, artifacts: &mut [Artifact], destination: &str) -> Result<()> {
        info!(count = artifacts.len(), "Creating artifacts");

        let api = self.api.as_ref();
        let job_id = self.job_id.as_str();
        let submitted: &[Artifact] = artifacts;
        let batch = retry(&self.config.registration_retry, move |attempt| async move {
            let result = api.create_artifacts(job_id, submitted, destination).await;
            if let Err(e) = &result {
                warn!("{} ({})", e, attempt);
                if e.is_unrecoverable() {
                    attempt.break_retries();
                }
            }
            result
        })
        .await?;

        if batch.artifact_ids.len() != artifacts.len() {
            return Err(AgentError::Internal(format!(
                "Backend returned {} artifact IDs for {} artifacts",
                batch.artifact_ids.len(),
                artifacts.len()
            )));
        }

        let instructions = batch.upload_instructions.map(Arc::new);
        for (artifact, id) in artifacts.iter_mut().zip(batch.artifact_ids) {
            artifact.mark_registered(id, instructions.clone())?;
        }

        Ok(())
    }
}

fn registered_id(artifact: &Artifact) -> Result<ArtifactId> {
    artifact
        .id()
        .map(str::to_string)
        .ok_or_else(|| DomainError::NotRegistered(artifact.path.clone()).into())
}

async fn upload_one(
    uploader: &dyn Uploader,
    artifact: &Artifact,
    id: &str,
    retry_config: &RetryConfig,
    ledger: &StateLedger,
) -> ArtifactState {
    info!(
        artifact_id = %id,
        path = %artifact.path,
        bytes = artifact.file_size,
        "Uploading artifact"
    );

    let result = retry(retry_config, move |attempt| async move {
        let result = uploader.upload(artifact).await;
        if let Err(e) = &result {
            warn!("{} ({})", e, attempt);
        }
        result
    })
    .await;

    let state = match result {
        Ok(()) => ArtifactState::Finished,
        Err(e) => {
            error!(path = %artifact.path, error = %e, "Error uploading artifact");
            ledger.record_failure(format!("Error uploading artifact \"{}\": {}", artifact.path, e));
            ArtifactState::Error
        }
    };

    ledger.report(id, state);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::agent_api::mocks::MockAgentApi;
    use crate::port::uploader::mocks::{MockUploader, MockUploaderFactory};
    use crate::port::UploadError;

    fn artifacts(paths: &[&str]) -> Vec<Artifact> {
        paths
            .iter()
            .map(|p| Artifact::new(*p, format!("/work/{}", p), "*.txt", 4, "sha"))
            .collect()
    }

    fn coordinator(
        api: Arc<MockAgentApi>,
        uploader: Arc<MockUploader>,
        concurrency: usize,
    ) -> (UploadCoordinator, Arc<MockUploaderFactory>) {
        let factory = Arc::new(MockUploaderFactory::new(uploader));
        let config = UploadConfig {
            concurrency,
            ..UploadConfig::default()
        };
        (
            UploadCoordinator::new(api, factory.clone(), "job-1", config),
            factory,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_failure_does_not_stop_siblings() {
        let api = Arc::new(MockAgentApi::new());
        let uploader = Arc::new(
            MockUploader::failing_for(["b.txt"]).with_delay(Duration::from_millis(50)),
        );
        let (coordinator, _) = coordinator(api.clone(), uploader.clone(), 2);
        let mut batch = artifacts(&["a.txt", "b.txt", "c.txt"]);

        let result = coordinator.upload(&mut batch, "s3://bucket").await;

        assert!(matches!(
            result,
            Err(AgentError::PartialUpload { failed: 1, total: 3 })
        ));
        let states: Vec<_> = batch.iter().map(|a| a.state()).collect();
        assert_eq!(
            states,
            vec![
                Some(ArtifactState::Finished),
                Some(ArtifactState::Error),
                Some(ArtifactState::Finished)
            ]
        );

        let flushed = api.flushed_states();
        assert_eq!(flushed.len(), 3);
        assert_eq!(
            flushed
                .values()
                .filter(|s| **s == ArtifactState::Finished)
                .count(),
            2
        );
        assert_eq!(flushed.get(batch[1].id().unwrap()), Some(&ArtifactState::Error));

        assert!(uploader.max_in_flight() <= 2);
        assert_eq!(uploader.attempts("b.txt"), UPLOAD_RETRY.maximum as usize);
        assert_eq!(uploader.attempts("a.txt"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_upload_sets_ids_and_urls() {
        let api = Arc::new(MockAgentApi::new());
        let uploader = Arc::new(MockUploader::new());
        let (coordinator, factory) = coordinator(api.clone(), uploader, 10);
        let mut batch = artifacts(&["a.txt", "b.txt"]);

        coordinator
            .upload(&mut batch, "gs://assets/builds")
            .await
            .unwrap();

        assert_eq!(batch[0].url.as_deref(), Some("mock://bucket/a.txt"));
        assert!(batch.iter().all(|a| a.id().is_some()));
        assert!(batch
            .iter()
            .all(|a| a.state() == Some(ArtifactState::Finished)));
        assert_eq!(api.registration_calls(), 1);
        assert_eq!(
            factory.requested(),
            vec![Destination::GoogleCloudStorage {
                bucket: "assets".to_string(),
                prefix: "builds".to_string()
            }]
        );
        // URLs were computed before registration
        assert!(api.registered().iter().all(|a| a.url.is_some()));
    }

    #[tokio::test]
    async fn test_nothing_to_upload() {
        let api = Arc::new(MockAgentApi::new());
        let (coordinator, _) = coordinator(api.clone(), Arc::new(MockUploader::new()), 10);

        coordinator.upload(&mut [], "").await.unwrap();
        assert_eq!(api.registration_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_destination_fails_before_registration() {
        let api = Arc::new(MockAgentApi::new());
        let (coordinator, _) = coordinator(api.clone(), Arc::new(MockUploader::new()), 10);
        let mut batch = artifacts(&["a.txt"]);

        let result = coordinator.upload(&mut batch, "log/*.txt").await;

        assert!(matches!(
            result,
            Err(AgentError::Upload(UploadError::InvalidDestination(_)))
        ));
        assert_eq!(api.registration_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_registration_is_not_retried() {
        let api = Arc::new(MockAgentApi::failing_registration(422));
        let uploader = Arc::new(MockUploader::new());
        let (coordinator, _) = coordinator(api.clone(), uploader.clone(), 10);
        let mut batch = artifacts(&["a.txt"]);

        let result = coordinator.upload(&mut batch, "").await;

        assert!(matches!(result, Err(AgentError::Api(_))));
        assert_eq!(api.registration_calls(), 1);
        assert_eq!(uploader.attempts("a.txt"), 0);
        assert_eq!(batch[0].id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_registration_is_retried() {
        let api = Arc::new(MockAgentApi::failing_registration(503));
        let (coordinator, _) = coordinator(api.clone(), Arc::new(MockUploader::new()), 10);
        let mut batch = artifacts(&["a.txt"]);

        assert!(coordinator.upload(&mut batch, "").await.is_err());
        assert_eq!(api.registration_calls(), REGISTRATION_RETRY.maximum as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flaky_status_flush_recovers() {
        let api = Arc::new(MockAgentApi::new().with_update_failures(3));
        let (coordinator, _) = coordinator(api.clone(), Arc::new(MockUploader::new()), 2);
        let mut batch = artifacts(&["a.txt", "b.txt", "c.txt"]);

        coordinator.upload(&mut batch, "").await.unwrap();

        assert_eq!(api.flushed_states().len(), 3);
    }
}
