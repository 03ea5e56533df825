//! Conveyor Agent - Main Entry Point
//! Runs build commands, streams their output and delivers their artifacts

mod cli;
mod commands;
mod config;
mod logging;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing::debug;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.log_format, cli.debug);

    debug!("Conveyor Agent v{}", conveyor_core::VERSION);

    commands::dispatch(cli.command).await
}
