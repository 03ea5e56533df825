// Uploader selection by destination
use conveyor_core::port::{Destination, UploadError, Uploader, UploaderFactory};
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

use crate::form_uploader::FormUploader;
use crate::object_store::{ObjectStoreConfig, ObjectStoreUploader};

pub struct HttpUploaderFactory {
    client: Client,
    object_store: ObjectStoreConfig,
}

impl HttpUploaderFactory {
    pub fn new(object_store: ObjectStoreConfig) -> Result<Self, UploadError> {
        let client = Client::builder()
            .user_agent(format!("conveyor-agent/{}", conveyor_core::VERSION))
            .build()
            .map_err(|e| UploadError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            object_store,
        })
    }
}

impl UploaderFactory for HttpUploaderFactory {
    fn create(&self, destination: &Destination) -> Result<Arc<dyn Uploader>, UploadError> {
        debug!(destination = ?destination, "Selecting uploader");
        match destination {
            Destination::BackendHosted => Ok(Arc::new(FormUploader::new(self.client.clone()))),
            other => Ok(Arc::new(ObjectStoreUploader::new(
                self.client.clone(),
                other.clone(),
                self.object_store.clone(),
            )?)),
        }
    }
}
