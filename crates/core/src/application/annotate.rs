// Build annotations
use crate::application::retry::{retry, RetryConfig};
use crate::error::Result;
use crate::port::{AgentApi, Annotation};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const ANNOTATE_RETRY: RetryConfig = RetryConfig::new(5, Duration::from_secs(1)).with_jitter();

pub struct AnnotationService {
    api: Arc<dyn AgentApi>,
    job_id: String,
    retry: RetryConfig,
}

impl AnnotationService {
    pub fn new(api: Arc<dyn AgentApi>, job_id: impl Into<String>) -> Self {
        Self {
            api,
            job_id: job_id.into(),
            retry: ANNOTATE_RETRY,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Post `annotation`, retrying transient failures
    pub async fn annotate(&self, annotation: &Annotation) -> Result<()> {
        let api = self.api.as_ref();
        let job_id = self.job_id.as_str();

        retry(&self.retry, move |attempt| async move {
            let result = api.annotate(job_id, annotation).await;
            if let Err(e) = &result {
                if e.is_unrecoverable() {
                    attempt.break_retries();
                } else {
                    warn!("{} ({})", e, attempt);
                }
            }
            result
        })
        .await?;

        info!("Successfully annotated build");
        Ok(())
    }
}
