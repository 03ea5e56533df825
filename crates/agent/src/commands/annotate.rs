// `annotate`
use crate::cli::AnnotateArgs;
use crate::config::ApiSettings;
use anyhow::{Context, Result};
use conveyor_core::application::AnnotationService;
use conveyor_core::port::Annotation;
use conveyor_infra_http::HttpAgentApi;
use std::io::IsTerminal;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::info;

pub async fn execute(args: AnnotateArgs) -> Result<ExitCode> {
    let settings = ApiSettings::try_from(&args.api)?;

    let body = match args.body {
        Some(body) => body,
        None if !std::io::stdin().is_terminal() => {
            info!("Reading annotation body from STDIN");
            let mut body = String::new();
            tokio::io::stdin()
                .read_to_string(&mut body)
                .await
                .context("Failed to read from STDIN")?;
            body
        }
        None => String::new(),
    };

    let annotation = Annotation {
        body: body.trim().to_string(),
        style: args.style,
        context: args.context,
        append: args.append,
    };

    let client = HttpAgentApi::new(settings.api).context("Failed to create API client")?;
    AnnotationService::new(Arc::new(client), settings.job_id)
        .annotate(&annotation)
        .await
        .context("Failed to annotate build")?;

    Ok(ExitCode::SUCCESS)
}
