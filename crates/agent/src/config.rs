// Typed configuration folded from the parsed flags
use crate::cli::{ApiArgs, RunArgs, UploadArgs};
use conveyor_core::application::UploadConfig;
use conveyor_core::AgentError;
use conveyor_infra_http::{ApiConfig, ObjectStoreConfig};
use conveyor_infra_system::ProcessConfig;
use std::path::PathBuf;
use std::time::Duration;

/// Everything API-backed commands need to talk to the backend
#[derive(Debug, Clone)]
pub struct ApiSettings {
    pub api: ApiConfig,
    pub job_id: String,
}

impl TryFrom<&ApiArgs> for ApiSettings {
    type Error = AgentError;

    fn try_from(args: &ApiArgs) -> Result<Self, Self::Error> {
        let endpoint = required(&args.endpoint, "--endpoint", "CONVEYOR_ENDPOINT")?;
        let token = required(
            &args.agent_access_token,
            "--agent-access-token",
            "CONVEYOR_AGENT_ACCESS_TOKEN",
        )?;
        let job_id = required(&args.job_id, "--job", "CONVEYOR_JOB_ID")?;

        Ok(Self {
            api: ApiConfig::new(endpoint, token),
            job_id,
        })
    }
}

fn required(value: &Option<String>, flag: &str, env: &str) -> Result<String, AgentError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AgentError::Config(format!("Missing {} (or {})", flag, env)))
}

impl UploadArgs {
    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            concurrency: self.upload_concurrency.max(1),
            ..UploadConfig::default()
        }
    }

    pub fn object_store_config(&self) -> ObjectStoreConfig {
        ObjectStoreConfig {
            s3_acl: self.s3_acl.clone(),
            gcs_access_token: self.gs_access_token.clone(),
        }
    }
}

/// One `run` invocation
#[derive(Debug, Clone)]
pub struct JobRunConfig {
    pub process: ProcessConfig,
    pub grace_period: Duration,
    pub artifact_paths: Option<String>,
    pub artifact_destination: String,
    pub log_file: Option<PathBuf>,
}

impl From<&RunArgs> for JobRunConfig {
    fn from(args: &RunArgs) -> Self {
        let process = ProcessConfig {
            argv: args.command.clone(),
            env: args.env.iter().cloned().collect(),
            working_dir: args.working_dir.clone(),
            pty: args.pty,
            timestamp_lines: args.timestamp_lines,
        };

        Self {
            process,
            grace_period: Duration::from_secs(args.cancel_grace_period),
            artifact_paths: args
                .artifact_paths
                .clone()
                .filter(|paths| !paths.trim().is_empty()),
            artifact_destination: args.artifact_upload_destination.clone(),
            log_file: args.log_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_settings_name_the_flag() {
        let args = ApiArgs {
            endpoint: Some("https://agent.example.com".to_string()),
            agent_access_token: Some("  ".to_string()),
            job_id: Some("job-1".to_string()),
        };

        let err = ApiSettings::try_from(&args).unwrap_err();
        assert!(err.to_string().contains("CONVEYOR_AGENT_ACCESS_TOKEN"));
    }

    #[test]
    fn test_complete_api_settings() {
        let args = ApiArgs {
            endpoint: Some("https://agent.example.com".to_string()),
            agent_access_token: Some("secret".to_string()),
            job_id: Some("job-1".to_string()),
        };

        let settings = ApiSettings::try_from(&args).unwrap();
        assert_eq!(settings.job_id, "job-1");
        assert_eq!(settings.api.token, "secret");
    }

    #[test]
    fn test_run_config_from_args() {
        use clap::Parser;

        let cli = crate::cli::Cli::try_parse_from([
            "conveyor-agent",
            "run",
            "--timestamp-lines",
            "--cancel-grace-period",
            "3",
            "--artifact-paths",
            " ",
            "--env",
            "A=1",
            "--",
            "sh",
            "-c",
            "true",
        ])
        .unwrap();
        let crate::cli::Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let config = JobRunConfig::from(&args);
        assert!(config.process.timestamp_lines);
        assert_eq!(config.process.argv, vec!["sh", "-c", "true"]);
        assert_eq!(config.process.env.get("A").map(String::as_str), Some("1"));
        assert_eq!(config.grace_period, Duration::from_secs(3));
        assert_eq!(config.artifact_paths, None);
    }
}
