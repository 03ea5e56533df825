// Backend-hosted form uploads
// The registration response says where to POST and which form fields to send
use async_trait::async_trait;
use conveyor_core::domain::Artifact;
use conveyor_core::port::{UploadError, Uploader};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Method, Response};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::debug;

pub struct FormUploader {
    client: Client,
}

impl FormUploader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Uploader for FormUploader {
    /// The backend decides where the file ends up
    fn url(&self, _artifact: &Artifact) -> Option<String> {
        None
    }

    async fn upload(&self, artifact: &Artifact) -> Result<(), UploadError> {
        let instructions = artifact
            .upload_instructions()
            .ok_or_else(|| UploadError::MissingInstructions(artifact.path.clone()))?;

        let method = Method::from_bytes(instructions.method.to_uppercase().as_bytes())
            .map_err(|e| UploadError::Setup(format!("bad upload method: {}", e)))?;

        let mut form = Form::new();
        for (name, value) in instructions.form_fields(&artifact.path) {
            form = form.text(name, value);
        }

        let (body, length) = file_body(artifact).await?;
        let file_name = Path::new(&artifact.path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| artifact.path.clone());
        form = form.part(
            instructions.file_input.clone(),
            Part::stream_with_length(body, length).file_name(file_name),
        );

        debug!(path = %artifact.path, action = %instructions.action, "Uploading artifact form");
        let response = self
            .client
            .request(method, &instructions.action)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        ensure_success(response).await
    }
}

/// Stream the artifact from disk, with its current length
pub(crate) async fn file_body(artifact: &Artifact) -> Result<(Body, u64), UploadError> {
    let file = tokio::fs::File::open(&artifact.absolute_path).await?;
    let length = file.metadata().await?.len();
    Ok((Body::wrap_stream(ReaderStream::new(file)), length))
}

/// Turn a non-2xx upload response into an error carrying its body
pub(crate) async fn ensure_success(response: Response) -> Result<(), UploadError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let message = response.text().await.unwrap_or_default();
    Err(UploadError::Rejected {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}
