// Artifact upload use case
// Collect files matching a path specification, then hand them to the coordinator
use crate::application::collector::ArtifactCollector;
use crate::application::upload::UploadCoordinator;
use crate::domain::Artifact;
use crate::error::{AgentError, Result};
use tracing::info;

pub struct ArtifactUploadService {
    collector: ArtifactCollector,
    coordinator: UploadCoordinator,
}

impl ArtifactUploadService {
    pub fn new(collector: ArtifactCollector, coordinator: UploadCoordinator) -> Self {
        Self {
            collector,
            coordinator,
        }
    }

    pub fn collector(&self) -> &ArtifactCollector {
        &self.collector
    }

    /// Upload everything matching `paths`; returns the uploaded artifacts
    pub async fn upload(&self, paths: &str, destination: &str) -> Result<Vec<Artifact>> {
        let collector = self.collector.clone();
        let path_spec = paths.to_string();
        let mut artifacts = tokio::task::spawn_blocking(move || collector.collect(&path_spec))
            .await
            .map_err(|e| AgentError::Internal(format!("Artifact collection panicked: {}", e)))??;

        if artifacts.is_empty() {
            info!("No files matched paths: {}", paths);
            return Ok(artifacts);
        }

        info!("Found {} files that match \"{}\"", artifacts.len(), paths);
        self.coordinator.upload(&mut artifacts, destination).await?;

        Ok(artifacts)
    }
}
