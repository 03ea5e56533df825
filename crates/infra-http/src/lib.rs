// Conveyor Infrastructure - HTTP Adapters
// Implements: AgentApi, Uploader, UploaderFactory

mod api_client;
mod factory;
mod form_uploader;
mod object_store;

pub use api_client::{ApiConfig, HttpAgentApi};
pub use factory::HttpUploaderFactory;
pub use form_uploader::FormUploader;
pub use object_store::{ObjectStoreConfig, ObjectStoreUploader, DEFAULT_S3_ACL};
