// Agent API client
// reason: reqwest for HTTP, serde for the JSON bodies
use async_trait::async_trait;
use conveyor_core::domain::{Artifact, ArtifactId, ArtifactState, UploadInstructions};
use conveyor_core::port::{AgentApi, Annotation, ApiError, RegisteredBatch};
use reqwest::{Client, Method, Response};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL, e.g. `https://agent.example.com/v3`
    pub endpoint: String,
    pub token: String,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: token.into(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

#[derive(Serialize)]
struct ArtifactPayload<'a> {
    path: &'a str,
    absolute_path: String,
    glob_path: &'a str,
    file_size: u64,
    sha1sum: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
}

impl<'a> From<&'a Artifact> for ArtifactPayload<'a> {
    fn from(artifact: &'a Artifact) -> Self {
        Self {
            path: &artifact.path,
            absolute_path: artifact.absolute_path.to_string_lossy().into_owned(),
            glob_path: &artifact.glob_path,
            file_size: artifact.file_size,
            sha1sum: &artifact.sha1sum,
            url: artifact.url.as_deref(),
        }
    }
}

#[derive(Serialize)]
struct CreateArtifactsRequest<'a> {
    artifacts: Vec<ArtifactPayload<'a>>,
    upload_destination: &'a str,
}

#[derive(Deserialize)]
struct CreateArtifactsResponse {
    artifact_ids: Vec<ArtifactId>,
    #[serde(default)]
    upload_instructions: Option<UploadInstructions>,
}

#[derive(Serialize)]
struct StateUpdate<'a> {
    id: &'a str,
    state: ArtifactState,
}

#[derive(Serialize)]
struct UpdateArtifactsRequest<'a> {
    artifacts: Vec<StateUpdate<'a>>,
}

#[derive(Serialize)]
struct AnnotationRequest<'a> {
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    style: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<&'a str>,
    append: bool,
}

/// JSON-over-HTTP backend client
pub struct HttpAgentApi {
    client: Client,
    config: ApiConfig,
}

impl HttpAgentApi {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("conveyor-agent/{}", conveyor_core::VERSION))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Response, ApiError> {
        let url = self.url(path);
        debug!(method = %method, url = %url, "Sending API request");

        let response = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", format!("Token {}", self.config.token))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(ApiError::Status {
            method: method.to_string(),
            url,
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }
}

#[async_trait]
impl AgentApi for HttpAgentApi {
    async fn create_artifacts(
        &self,
        job_id: &str,
        artifacts: &[Artifact],
        destination: &str,
    ) -> Result<RegisteredBatch, ApiError> {
        let request = CreateArtifactsRequest {
            artifacts: artifacts.iter().map(ArtifactPayload::from).collect(),
            upload_destination: destination,
        };

        let response: CreateArtifactsResponse = self
            .send(Method::POST, &format!("jobs/{}/artifacts", job_id), &request)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        Ok(RegisteredBatch {
            artifact_ids: response.artifact_ids,
            upload_instructions: response.upload_instructions,
        })
    }

    async fn update_artifact_states(
        &self,
        job_id: &str,
        states: &HashMap<ArtifactId, ArtifactState>,
    ) -> Result<(), ApiError> {
        let request = UpdateArtifactsRequest {
            artifacts: states
                .iter()
                .map(|(id, state)| StateUpdate { id, state: *state })
                .collect(),
        };

        self.send(Method::PUT, &format!("jobs/{}/artifacts", job_id), &request)
            .await?;
        Ok(())
    }

    async fn annotate(&self, job_id: &str, annotation: &Annotation) -> Result<(), ApiError> {
        let request = AnnotationRequest {
            body: &annotation.body,
            style: annotation.style.as_deref(),
            context: annotation.context.as_deref(),
            append: annotation.append,
        };

        self.send(Method::POST, &format!("jobs/{}/annotations", job_id), &request)
            .await?;
        Ok(())
    }
}
