// Process Control Port
// Per-OS signal delivery and exit-code extraction

use async_trait::async_trait;
use std::process::ExitStatus;
use thiserror::Error;

/// Process supervision errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Process is already running")]
    AlreadyStarted,

    #[error("No command to run")]
    EmptyCommand,

    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Pseudo-terminal unavailable: {0}")]
    Pty(String),

    #[error("Failed to send {signal} to PID {pid}: {reason}")]
    Signal {
        signal: String,
        pid: u32,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Process control capability
///
/// Implementations:
/// - UnixProcessControl: SIGTERM / SIGKILL
/// - WindowsProcessControl: TASKKILL process-tree termination
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Ask the process to terminate
    async fn terminate(&self, pid: u32) -> Result<(), ProcessError>;

    /// Kill the process without giving it a chance to clean up
    async fn force_kill(&self, pid: u32) -> Result<(), ProcessError>;

    /// Numeric exit code of a finished process, if this platform can tell
    fn exit_code(&self, status: &ExitStatus) -> Option<i32>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Records signals instead of sending them
    #[derive(Default)]
    pub struct MockProcessControl {
        sent: Mutex<Vec<(String, u32)>>,
    }

    impl MockProcessControl {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<(String, u32)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessControl for MockProcessControl {
        async fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
            self.sent.lock().unwrap().push(("TERM".to_string(), pid));
            Ok(())
        }

        async fn force_kill(&self, pid: u32) -> Result<(), ProcessError> {
            self.sent.lock().unwrap().push(("KILL".to_string(), pid));
            Ok(())
        }

        fn exit_code(&self, status: &ExitStatus) -> Option<i32> {
            status.code()
        }
    }
}
