// `run`: supervise a command, stream its output, then upload its artifacts
use crate::cli::RunArgs;
use crate::commands::artifact;
use crate::config::JobRunConfig;
use anyhow::{Context, Result};
use chrono::Utc;
use conveyor_core::application::LineHooks;
use conveyor_core::domain::format_timestamp;
use conveyor_infra_system::ProcessSupervisor;
use regex::Regex;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

/// How often new output is forwarded while the command runs
const STREAM_INTERVAL: Duration = Duration::from_secs(1);

/// Section headers in build output (`--- `, `+++ `, `~~~ `)
static SECTION_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:---|\+\+\+|~~~)\s").expect("section header pattern is valid"));

fn section_header_hooks() -> LineHooks {
    LineHooks::default()
        .with_filter(|line| SECTION_HEADER.is_match(line))
        .with_callback(|line| {
            info!(header = %line, observed_at = %format_timestamp(Utc::now()), "Section");
        })
}

/// Process exit status to agent exit code; indeterminate maps to 255
fn exit_code_for(status: Option<i32>) -> u8 {
    status.and_then(|code| u8::try_from(code).ok()).unwrap_or(u8::MAX)
}

/// Forwards newly captured output to stdout and an optional log file
struct OutputStream {
    stdout: tokio::io::Stdout,
    log_file: Option<File>,
    offset: usize,
}

impl OutputStream {
    async fn open(log_file: Option<&Path>) -> Result<Self> {
        let log_file = match log_file {
            Some(path) => Some(
                File::create(path)
                    .await
                    .with_context(|| format!("Failed to create log file {}", path.display()))?,
            ),
            None => None,
        };

        Ok(Self {
            stdout: tokio::io::stdout(),
            log_file,
            offset: 0,
        })
    }

    async fn forward(&mut self, supervisor: &ProcessSupervisor) -> Result<()> {
        let fresh = supervisor.output_since(self.offset);
        if fresh.is_empty() {
            return Ok(());
        }

        self.stdout.write_all(&fresh).await?;
        self.stdout.flush().await?;
        if let Some(file) = &mut self.log_file {
            file.write_all(&fresh).await?;
            file.flush().await?;
        }

        self.offset += fresh.len();
        Ok(())
    }
}

/// Interrupt bookkeeping: a Ctrl-C before the command has a pid is held
/// until the pid exists, then the kill is issued once
#[derive(Debug, Default)]
struct Interrupts {
    requested: bool,
    kill_sent: bool,
}

impl Interrupts {
    fn take_kill(&mut self, pid: Option<u32>) -> bool {
        if self.requested && !self.kill_sent && pid.is_some() {
            self.kill_sent = true;
            return true;
        }
        false
    }
}

fn spawn_kill(supervisor: &Arc<ProcessSupervisor>, grace: Duration) {
    let supervisor = Arc::clone(supervisor);
    tokio::spawn(async move {
        if let Err(e) = supervisor.kill(grace).await {
            error!(error = %e, "Failed to stop the command");
        }
    });
}

pub async fn execute(args: RunArgs) -> Result<ExitCode> {
    let job = JobRunConfig::from(&args);
    let supervisor = Arc::new(
        ProcessSupervisor::new(job.process.clone()).with_line_hooks(section_header_hooks()),
    );
    let mut output = OutputStream::open(job.log_file.as_deref()).await?;

    let runner = {
        let supervisor = Arc::clone(&supervisor);
        tokio::spawn(async move { supervisor.start().await })
    };

    let mut done = supervisor.done();
    let mut ticker = tokio::time::interval(STREAM_INTERVAL);
    let mut interrupts = Interrupts::default();

    loop {
        tokio::select! {
            _ = done.wait() => break,
            _ = ticker.tick() => {
                output.forward(&supervisor).await?;
                if interrupts.take_kill(supervisor.pid()) {
                    spawn_kill(&supervisor, job.grace_period);
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupts.requested => {
                interrupts.requested = true;
                signal.context("Failed to listen for interrupt")?;
                warn!("Interrupted, stopping the command");

                if interrupts.take_kill(supervisor.pid()) {
                    spawn_kill(&supervisor, job.grace_period);
                }
            }
        }
    }

    let started = runner.await.context("Command runner panicked")?;
    output.forward(&supervisor).await?;
    started.context("Failed to run command")?;

    let mut code = exit_code_for(supervisor.exit_code());
    info!(exit_status = %supervisor.exit_status(), "Command finished");

    if let Some(paths) = &job.artifact_paths {
        let uploaded = match artifact::build_service(
            &args.api,
            &args.upload,
            job.process.working_dir.as_deref(),
        ) {
            Ok(service) => service
                .upload(paths, &job.artifact_destination)
                .await
                .map_err(anyhow::Error::from),
            Err(e) => Err(e),
        };

        if let Err(e) = uploaded {
            error!("Failed to upload artifacts: {:#}", e);
            if code == 0 {
                code = 1;
            }
        }
    }

    Ok(ExitCode::from(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_code_for(Some(0)), 0);
        assert_eq!(exit_code_for(Some(42)), 42);
        assert_eq!(exit_code_for(Some(-1)), 255);
        assert_eq!(exit_code_for(None), 255);
    }

    #[test]
    fn test_interrupt_before_start_is_held() {
        let mut interrupts = Interrupts::default();
        assert!(!interrupts.take_kill(Some(42)));

        interrupts.requested = true;
        assert!(!interrupts.take_kill(None));
        assert!(interrupts.take_kill(Some(42)));
        assert!(!interrupts.take_kill(Some(42)));
    }

    #[test]
    fn test_section_headers() {
        assert!(SECTION_HEADER.is_match("--- Running tests"));
        assert!(SECTION_HEADER.is_match("+++ Build"));
        assert!(SECTION_HEADER.is_match("~~~ Setup"));
        assert!(!SECTION_HEADER.is_match("---no-space"));
        assert!(!SECTION_HEADER.is_match(" --- indented"));
    }
}
