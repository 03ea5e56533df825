// Artifact Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Backend-assigned artifact ID
pub type ArtifactId = String;

/// Separates glob patterns in an artifact path specification
pub const ARTIFACT_PATH_DELIMITER: char = ';';

/// Placeholder in form upload fields replaced by the artifact's relative path
const ARTIFACT_PATH_PLACEHOLDER: &str = "${artifact:path}";

/// Artifact upload state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactState {
    Pending,
    Finished,
    Error,
}

impl ArtifactState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactState::Pending => "pending",
            ArtifactState::Finished => "finished",
            ArtifactState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ArtifactState::Pending)
    }
}

impl std::fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Form upload instructions handed out by the backend at registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInstructions {
    pub action: String,
    pub method: String,
    #[serde(default)]
    pub data: HashMap<String, String>,
    pub file_input: String,
}

impl UploadInstructions {
    /// Form fields for one artifact, sorted by name, with `${artifact:path}` expanded
    pub fn form_fields(&self, artifact_path: &str) -> Vec<(String, String)> {
        let mut fields: Vec<(String, String)> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.replace(ARTIFACT_PATH_PLACEHOLDER, artifact_path)))
            .collect();
        fields.sort();
        fields
    }
}

/// One file to deliver to the backend
///
/// `id` and `state` stay unset until registration succeeds. After that only
/// state transitions are allowed, and a terminal state is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path as reported to the backend
    pub path: String,
    pub absolute_path: PathBuf,
    /// Glob pattern that matched this file
    pub glob_path: String,
    pub file_size: u64,
    pub sha1sum: String,
    /// Destination URL, filled in by the selected uploader
    pub url: Option<String>,

    id: Option<ArtifactId>,
    state: Option<ArtifactState>,
    upload_instructions: Option<Arc<UploadInstructions>>,
}

impl Artifact {
    pub fn new(
        path: impl Into<String>,
        absolute_path: impl Into<PathBuf>,
        glob_path: impl Into<String>,
        file_size: u64,
        sha1sum: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            absolute_path: absolute_path.into(),
            glob_path: glob_path.into(),
            file_size,
            sha1sum: sha1sum.into(),
            url: None,
            id: None,
            state: None,
            upload_instructions: None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn state(&self) -> Option<ArtifactState> {
        self.state
    }

    pub fn upload_instructions(&self) -> Option<&UploadInstructions> {
        self.upload_instructions.as_deref()
    }

    /// Record the backend-assigned ID; the artifact becomes pending
    pub fn mark_registered(
        &mut self,
        id: impl Into<ArtifactId>,
        instructions: Option<Arc<UploadInstructions>>,
    ) -> Result<()> {
        if self.id.is_some() {
            return Err(DomainError::AlreadyRegistered(self.path.clone()));
        }
        self.id = Some(id.into());
        self.state = Some(ArtifactState::Pending);
        self.upload_instructions = instructions;
        Ok(())
    }

    /// Move a registered artifact to a new state
    pub fn transition(&mut self, next: ArtifactState) -> Result<()> {
        let current = self
            .state
            .ok_or_else(|| DomainError::NotRegistered(self.path.clone()))?;

        if current.is_terminal() || next == ArtifactState::Pending {
            return Err(DomainError::InvalidStateTransition {
                path: self.path.clone(),
                from: current.to_string(),
                to: next.to_string(),
            });
        }

        self.state = Some(next);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> Artifact {
        Artifact::new("a/x.txt", "/work/a/x.txt", "a/*.txt", 3, "abc")
    }

    #[test]
    fn test_state_wire_names() {
        assert_eq!(
            serde_json::to_string(&ArtifactState::Finished).unwrap(),
            "\"finished\""
        );
        let state: ArtifactState = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(state, ArtifactState::Error);
    }

    #[test]
    fn test_instructions_without_data() {
        let instructions: UploadInstructions = serde_json::from_str(
            r#"{"action": "https://uploads.example.com", "method": "PUT", "file_input": "file"}"#,
        )
        .unwrap();
        assert!(instructions.form_fields("a.txt").is_empty());
    }

    #[test]
    fn test_unregistered_artifact_has_no_id_or_state() {
        let a = artifact();
        assert_eq!(a.id(), None);
        assert_eq!(a.state(), None);
    }

    #[test]
    fn test_transition_requires_registration() {
        let mut a = artifact();
        assert_eq!(
            a.transition(ArtifactState::Finished),
            Err(DomainError::NotRegistered("a/x.txt".to_string()))
        );
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut a = artifact();
        a.mark_registered("id-1", None).unwrap();
        assert_eq!(a.state(), Some(ArtifactState::Pending));

        a.transition(ArtifactState::Error).unwrap();
        assert!(matches!(
            a.transition(ArtifactState::Finished),
            Err(DomainError::InvalidStateTransition { .. })
        ));
        assert_eq!(a.state(), Some(ArtifactState::Error));
    }

    #[test]
    fn test_double_registration_rejected() {
        let mut a = artifact();
        a.mark_registered("id-1", None).unwrap();
        assert!(a.mark_registered("id-2", None).is_err());
        assert_eq!(a.id(), Some("id-1"));
    }

    #[test]
    fn test_form_fields_expand_artifact_path() {
        let instructions = UploadInstructions {
            action: "https://uploads.example.com".to_string(),
            method: "POST".to_string(),
            data: HashMap::from([
                ("key".to_string(), "job-1/${artifact:path}".to_string()),
                ("acl".to_string(), "private".to_string()),
            ]),
            file_input: "file".to_string(),
        };

        let fields = instructions.form_fields("a/x.txt");
        assert_eq!(
            fields,
            vec![
                ("acl".to_string(), "private".to_string()),
                ("key".to_string(), "job-1/a/x.txt".to_string()),
            ]
        );
    }
}
