// Command-line interface
// Every flag falls back to a CONVEYOR_* environment variable
use clap::{Args, Parser, Subcommand, ValueEnum};
use conveyor_core::application::pool::DEFAULT_POOL_CAPACITY;
use conveyor_infra_http::DEFAULT_S3_ACL;
use std::path::PathBuf;

pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 10;

#[derive(Parser)]
#[command(name = "conveyor-agent")]
#[command(about = "Conveyor build agent", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(long, global = true, env = "CONVEYOR_DEBUG")]
    pub debug: bool,

    /// Log output format
    #[arg(long, global = true, env = "CONVEYOR_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command, stream its output and upload its artifacts
    Run(RunArgs),

    /// Work with build artifacts
    Artifact {
        #[command(subcommand)]
        command: ArtifactCommands,
    },

    /// Annotate the build page
    Annotate(AnnotateArgs),
}

#[derive(Subcommand)]
pub enum ArtifactCommands {
    /// Upload files matching one or more glob patterns
    Upload(ArtifactUploadArgs),
}

/// Backend connection
#[derive(Args, Debug, Clone, Default)]
pub struct ApiArgs {
    /// Agent API endpoint
    #[arg(long, env = "CONVEYOR_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Agent access token
    #[arg(long, env = "CONVEYOR_AGENT_ACCESS_TOKEN", hide_env_values = true)]
    pub agent_access_token: Option<String>,

    /// Job the command belongs to
    #[arg(long = "job", env = "CONVEYOR_JOB_ID")]
    pub job_id: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct UploadArgs {
    /// Artifacts uploaded at once
    #[arg(long, env = "CONVEYOR_ARTIFACT_UPLOAD_CONCURRENCY", default_value_t = DEFAULT_POOL_CAPACITY)]
    pub upload_concurrency: usize,

    /// Canned ACL for S3 uploads
    #[arg(long, env = "CONVEYOR_S3_ACL", default_value = DEFAULT_S3_ACL)]
    pub s3_acl: String,

    /// Bearer token for Google Cloud Storage uploads
    #[arg(long, env = "CONVEYOR_GS_ACCESS_TOKEN", hide_env_values = true)]
    pub gs_access_token: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Attach the command to a pseudo-terminal
    #[arg(long, env = "CONVEYOR_RUN_IN_PTY")]
    pub pty: bool,

    /// Prefix each output line with a UTC timestamp
    #[arg(long, env = "CONVEYOR_TIMESTAMP_LINES")]
    pub timestamp_lines: bool,

    /// Extra environment variable for the command (KEY=VALUE, repeatable;
    /// newline-separated in the environment)
    #[arg(long = "env", env = "CONVEYOR_ENV", value_delimiter = '\n', value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,

    /// Seconds to wait after the termination signal before killing the command
    #[arg(long, env = "CONVEYOR_CANCEL_GRACE_PERIOD", default_value_t = DEFAULT_GRACE_PERIOD_SECS)]
    pub cancel_grace_period: u64,

    /// Glob patterns, separated by ';', to upload once the command finishes
    #[arg(long, env = "CONVEYOR_ARTIFACT_PATHS")]
    pub artifact_paths: Option<String>,

    /// s3:// or gs:// destination; empty uploads to the backend
    #[arg(long, env = "CONVEYOR_ARTIFACT_UPLOAD_DESTINATION", default_value = "")]
    pub artifact_upload_destination: String,

    /// Also write the command's output to this file
    #[arg(long, env = "CONVEYOR_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Working directory for the command; artifact paths resolve here too
    #[arg(long, env = "CONVEYOR_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub upload: UploadArgs,

    /// Command and arguments
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ArtifactUploadArgs {
    /// Glob patterns separated by ';'
    pub paths: String,

    /// s3:// or gs:// destination; empty uploads to the backend
    #[arg(env = "CONVEYOR_ARTIFACT_UPLOAD_DESTINATION", default_value = "")]
    pub destination: String,

    #[command(flatten)]
    pub api: ApiArgs,

    #[command(flatten)]
    pub upload: UploadArgs,
}

#[derive(Args, Debug)]
pub struct AnnotateArgs {
    /// Annotation body; read from stdin when omitted
    pub body: Option<String>,

    /// success, info, warning or error
    #[arg(long, env = "CONVEYOR_ANNOTATION_STYLE")]
    pub style: Option<String>,

    /// Distinguishes this annotation from others on the build
    #[arg(long, env = "CONVEYOR_ANNOTATION_CONTEXT")]
    pub context: Option<String>,

    /// Append to an existing annotation's body
    #[arg(long, env = "CONVEYOR_ANNOTATION_APPEND")]
    pub append: bool,

    #[command(flatten)]
    pub api: ApiArgs,
}

fn parse_key_val(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty variable name in '{}'", raw));
    }
    Ok((key.to_string(), value.to_string()))
}
