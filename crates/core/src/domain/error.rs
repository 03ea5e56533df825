// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    #[error("Invalid artifact state transition for {path}: {from} -> {to}")]
    InvalidStateTransition {
        path: String,
        from: String,
        to: String,
    },

    #[error("Artifact is not registered: {0}")]
    NotRegistered(String),

    #[error("Artifact is already registered: {0}")]
    AlreadyRegistered(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
