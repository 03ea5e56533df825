// Artifact status reporter
// Single task that batches state changes from the ledger to the backend
use super::ledger::StateLedger;
use crate::application::retry::{retry, RetryConfig};
use crate::port::AgentApi;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// What the reporter managed to flush
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub flushed: usize,
    pub failed_batches: usize,
}

pub struct StatusReporter {
    api: Arc<dyn AgentApi>,
    job_id: String,
    ledger: Arc<StateLedger>,
    total: usize,
    interval: Duration,
    retry: RetryConfig,
}

impl StatusReporter {
    pub fn new(
        api: Arc<dyn AgentApi>,
        job_id: impl Into<String>,
        ledger: Arc<StateLedger>,
        total: usize,
        interval: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            api,
            job_id: job_id.into(),
            ledger,
            total,
            interval,
            retry,
        }
    }

    /// Flush until `total` states went out or the ledger is closed and empty
    pub async fn run(self) -> ReportSummary {
        let mut summary = ReportSummary::default();

        loop {
            let (batch, closed) = self.ledger.drain();

            if !batch.is_empty() {
                summary.flushed += batch.len();
                for (id, state) in &batch {
                    debug!(artifact_id = %id, state = %state, "Artifact state changed");
                }

                let api = self.api.as_ref();
                let job_id = self.job_id.as_str();
                let batch_ref = &batch;
                let result = retry(&self.retry, move |attempt| async move {
                    let result = api.update_artifact_states(job_id, batch_ref).await;
                    if let Err(e) = &result {
                        warn!("{} ({})", e, attempt);
                        if e.is_unrecoverable() {
                            attempt.break_retries();
                        }
                    }
                    result
                })
                .await;

                if let Err(e) = result {
                    error!(error = %e, "Error uploading artifact states");
                    self.ledger
                        .record_failure(format!("Error uploading artifact states: {}", e));
                    summary.failed_batches += 1;
                }

                debug!(
                    "Uploaded {} artifact states ({}/{})",
                    batch.len(),
                    summary.flushed,
                    self.total
                );
            }

            if summary.flushed >= self.total || closed {
                break;
            }

            tokio::time::sleep(self.interval).await;
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArtifactState;
    use crate::port::agent_api::mocks::MockAgentApi;

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_total_flushed() {
        let api = Arc::new(MockAgentApi::new());
        let ledger = Arc::new(StateLedger::new());
        let reporter = StatusReporter::new(
            api.clone(),
            "job-1",
            ledger.clone(),
            2,
            Duration::from_secs(1),
            RetryConfig::new(3, Duration::from_secs(1)),
        );

        let handle = tokio::spawn(reporter.run());
        ledger.report("a", ArtifactState::Finished);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        ledger.report("b", ArtifactState::Error);

        let summary = handle.await.unwrap();
        assert_eq!(summary.flushed, 2);
        assert_eq!(summary.failed_batches, 0);
        assert_eq!(api.flushed_states().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_failed_flush() {
        let api = Arc::new(MockAgentApi::new().with_update_failures(2));
        let ledger = Arc::new(StateLedger::new());
        ledger.report("a", ArtifactState::Finished);

        let summary = StatusReporter::new(
            api.clone(),
            "job-1",
            ledger.clone(),
            1,
            Duration::from_secs(1),
            RetryConfig::new(5, Duration::from_secs(1)),
        )
        .run()
        .await;

        assert_eq!(summary.flushed, 1);
        assert_eq!(api.update_calls(), 3);
        assert!(ledger.failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_ledger_ends_loop_early() {
        let api = Arc::new(MockAgentApi::new());
        let ledger = Arc::new(StateLedger::new());
        ledger.report("a", ArtifactState::Finished);
        ledger.close();

        let summary = StatusReporter::new(
            api,
            "job-1",
            ledger,
            5,
            Duration::from_secs(1),
            RetryConfig::new(3, Duration::from_secs(1)),
        )
        .run()
        .await;

        assert_eq!(summary.flushed, 1);
    }
}
