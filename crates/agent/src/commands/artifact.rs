// `artifact upload`
use crate::cli::{ApiArgs, ArtifactUploadArgs, UploadArgs};
use crate::config::ApiSettings;
use anyhow::{Context, Result};
use conveyor_core::application::{ArtifactCollector, ArtifactUploadService, UploadCoordinator};
use conveyor_infra_http::{HttpAgentApi, HttpUploaderFactory};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

/// Wire the HTTP adapters into an upload service
///
/// Patterns resolve against `working_dir`, or the current directory when unset.
pub fn build_service(
    api: &ApiArgs,
    upload: &UploadArgs,
    working_dir: Option<&Path>,
) -> Result<ArtifactUploadService> {
    let settings = ApiSettings::try_from(api)?;
    let client = HttpAgentApi::new(settings.api).context("Failed to create API client")?;
    let uploaders = HttpUploaderFactory::new(upload.object_store_config())
        .context("Failed to create uploaders")?;

    let coordinator = UploadCoordinator::new(
        Arc::new(client),
        Arc::new(uploaders),
        settings.job_id,
        upload.upload_config(),
    );
    let collector = ArtifactCollector::for_working_dir(working_dir)?;

    Ok(ArtifactUploadService::new(collector, coordinator))
}

pub async fn upload(args: ArtifactUploadArgs) -> Result<ExitCode> {
    let service = build_service(&args.api, &args.upload, None)?;
    service
        .upload(&args.paths, &args.destination)
        .await
        .context("Failed to upload artifacts")?;

    Ok(ExitCode::SUCCESS)
}
