// Object storage uploads (S3, Google Cloud Storage)
// A plain HTTP PUT of the file body to the object's public URL
use async_trait::async_trait;
use conveyor_core::domain::Artifact;
use conveyor_core::port::{Destination, UploadError, Uploader};
use reqwest::header::CONTENT_LENGTH;
use reqwest::Client;
use tracing::debug;

use crate::form_uploader::{ensure_success, file_body};

pub const DEFAULT_S3_ACL: &str = "public-read";

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// Canned ACL sent as `x-amz-acl`
    pub s3_acl: String,
    /// Bearer token for GCS
    pub gcs_access_token: Option<String>,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            s3_acl: DEFAULT_S3_ACL.to_string(),
            gcs_access_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    S3,
    GoogleCloudStorage,
}

pub struct ObjectStoreUploader {
    client: Client,
    provider: Provider,
    bucket: String,
    destination: Destination,
    config: ObjectStoreConfig,
}

impl ObjectStoreUploader {
    pub fn new(
        client: Client,
        destination: Destination,
        config: ObjectStoreConfig,
    ) -> Result<Self, UploadError> {
        let (provider, bucket) = match &destination {
            Destination::S3 { bucket, .. } => (Provider::S3, bucket.clone()),
            Destination::GoogleCloudStorage { bucket, .. } => {
                (Provider::GoogleCloudStorage, bucket.clone())
            }
            Destination::BackendHosted => {
                return Err(UploadError::Setup(
                    "object storage needs an s3:// or gs:// destination".to_string(),
                ))
            }
        };

        Ok(Self {
            client,
            provider,
            bucket,
            destination,
            config,
        })
    }

    fn object_url(&self, artifact_path: &str) -> String {
        let key = self.destination.object_key(artifact_path);
        match self.provider {
            Provider::S3 => format!("https://{}.s3.amazonaws.com/{}", self.bucket, key),
            Provider::GoogleCloudStorage => {
                format!("https://storage.googleapis.com/{}/{}", self.bucket, key)
            }
        }
    }
}

#[async_trait]
impl Uploader for ObjectStoreUploader {
    fn url(&self, artifact: &Artifact) -> Option<String> {
        Some(self.object_url(&artifact.path))
    }

    async fn upload(&self, artifact: &Artifact) -> Result<(), UploadError> {
        let url = artifact
            .url
            .clone()
            .unwrap_or_else(|| self.object_url(&artifact.path));
        let (body, length) = file_body(artifact).await?;

        // Object stores reject chunked uploads
        let mut request = self
            .client
            .put(&url)
            .header(CONTENT_LENGTH, length)
            .body(body);
        request = match self.provider {
            Provider::S3 => request.header("x-amz-acl", &self.config.s3_acl),
            Provider::GoogleCloudStorage => match &self.config.gcs_access_token {
                Some(token) => request.bearer_auth(token),
                None => request,
            },
        };

        debug!(path = %artifact.path, url = %url, "Uploading artifact object");
        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        ensure_success(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uploader(destination: &str) -> ObjectStoreUploader {
        ObjectStoreUploader::new(
            Client::new(),
            Destination::parse(destination).unwrap(),
            ObjectStoreConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_s3_url() {
        let artifact = Artifact::new("logs/a.txt", "/w/logs/a.txt", "logs/*", 1, "s");
        assert_eq!(
            uploader("s3://my-bucket/builds/7").url(&artifact).as_deref(),
            Some("https://my-bucket.s3.amazonaws.com/builds/7/logs/a.txt")
        );
    }

    #[test]
    fn test_gcs_url_without_prefix() {
        let artifact = Artifact::new("a.txt", "/w/a.txt", "*.txt", 1, "s");
        assert_eq!(
            uploader("gs://assets").url(&artifact).as_deref(),
            Some("https://storage.googleapis.com/assets/a.txt")
        );
    }

    #[test]
    fn test_backend_hosted_is_rejected() {
        assert!(matches!(
            ObjectStoreUploader::new(
                Client::new(),
                Destination::BackendHosted,
                ObjectStoreConfig::default()
            ),
            Err(UploadError::Setup(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.txt");
        let artifact = Artifact::new("gone.txt", missing, "*.txt", 1, "s");

        tokio_test::assert_err!(uploader("s3://bucket").upload(&artifact).await);
    }
}
