// Artifact collection
// Resolves a glob path specification into checksummed artifact records
use crate::domain::{Artifact, ARTIFACT_PATH_DELIMITER};
use crate::error::{AgentError, Result};
use glob::{MatchOptions, Pattern};
use sha1::{Digest, Sha1};
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ArtifactCollector {
    working_dir: PathBuf,
}

impl ArtifactCollector {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    /// Collector rooted at the current directory
    pub fn from_current_dir() -> Result<Self> {
        Ok(Self::new(std::env::current_dir()?))
    }

    /// Collector rooted at a command's working directory
    ///
    /// Relative directories resolve against the current directory; `None`
    /// means the current directory itself.
    pub fn for_working_dir(working_dir: Option<&Path>) -> Result<Self> {
        match working_dir {
            Some(dir) if dir.is_absolute() => Ok(Self::new(dir)),
            Some(dir) => Ok(Self::new(std::env::current_dir()?.join(dir))),
            None => Self::from_current_dir(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Expand every pattern in `path_spec`, in order
    ///
    /// Files matched by more than one pattern appear once per pattern.
    pub fn collect(&self, path_spec: &str) -> Result<Vec<Artifact>> {
        let mut artifacts = Vec::new();

        for glob_path in path_spec
            .split(ARTIFACT_PATH_DELIMITER)
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            debug!(pattern = %glob_path, "Searching for artifacts");

            let absolute_pattern = Path::new(glob_path).is_absolute();
            let full_pattern = if absolute_pattern {
                glob_path.to_string()
            } else {
                let base = Pattern::escape(&self.working_dir.to_string_lossy());
                format!("{}/{}", base.trim_end_matches('/'), glob_path)
            };

            let options = MatchOptions {
                case_sensitive: true,
                require_literal_separator: true,
                require_literal_leading_dot: false,
            };
            let matches = glob::glob_with(&full_pattern, options).map_err(|e| AgentError::Glob {
                pattern: glob_path.to_string(),
                reason: e.to_string(),
            })?;

            let before = artifacts.len();
            for entry in matches {
                let file = entry.map_err(|e| AgentError::Io(e.into()))?;
                let absolute_path = normalize(&file);

                if absolute_path.is_dir() {
                    debug!(path = %absolute_path.display(), "Skipping directory");
                    continue;
                }

                // Absolute patterns are reported relative to the filesystem root
                let base = if absolute_pattern {
                    root_of(&absolute_path)
                } else {
                    normalize(&self.working_dir)
                };
                let path = relative_path(&absolute_path, &base);

                artifacts.push(build(path, absolute_path, glob_path)?);
            }

            if artifacts.len() == before {
                info!(pattern = %glob_path, "File not found");
            }
        }

        Ok(artifacts)
    }
}

/// Size and SHA-1 from a single open of the file
fn build(path: String, absolute_path: PathBuf, glob_path: &str) -> Result<Artifact> {
    let mut file = File::open(&absolute_path)?;
    let file_size = file.metadata()?.len();

    let mut hasher = Sha1::new();
    io::copy(&mut file, &mut hasher)?;
    let sha1sum = format!("{:x}", hasher.finalize());

    Ok(Artifact::new(path, absolute_path, glob_path, file_size, sha1sum))
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Root directory of `path` ("/" on unix, the volume root on windows)
fn root_of(path: &Path) -> PathBuf {
    path.components()
        .take_while(|c| matches!(c, Component::Prefix(_) | Component::RootDir))
        .collect()
}

/// `path` relative to `base`, with `/` separators
fn relative_path(path: &Path, base: &Path) -> String {
    let path_parts: Vec<Component> = path.components().collect();
    let base_parts: Vec<Component> = base.components().collect();

    let common = path_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let ups = base_parts[common..].iter().map(|_| "..".to_string());
    let rest = path_parts[common..]
        .iter()
        .map(|c| c.as_os_str().to_string_lossy().into_owned());

    ups.chain(rest).collect::<Vec<_>>().join("/")
}
