// Subcommand handlers

mod annotate;
mod artifact;
mod run;

use crate::cli::{ArtifactCommands, Commands};
use anyhow::Result;
use std::process::ExitCode;

pub async fn dispatch(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Run(args) => run::execute(args).await,
        Commands::Artifact {
            command: ArtifactCommands::Upload(args),
        } => artifact::upload(args).await,
        Commands::Annotate(args) => annotate::execute(args).await,
    }
}
