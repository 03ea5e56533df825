// ProcessControl implementations
// reason: nix for POSIX signals, TASKKILL where there are no signals
use async_trait::async_trait;
use conveyor_core::port::{ProcessControl, ProcessError};
use std::process::ExitStatus;
use std::sync::Arc;
use tracing::{debug, info};

/// Platform process control for the current target
pub fn default_process_control() -> Arc<dyn ProcessControl> {
    #[cfg(unix)]
    {
        Arc::new(UnixProcessControl)
    }

    #[cfg(windows)]
    {
        Arc::new(WindowsProcessControl)
    }
}

/// SIGTERM, then SIGKILL
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixProcessControl;

#[cfg(unix)]
impl UnixProcessControl {
    fn send(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), ProcessError> {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| ProcessError::Signal {
            signal: signal.to_string(),
            pid,
            reason: "PID out of range".to_string(),
        })?;

        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => Ok(()),
            // Already gone; nothing left to signal
            Err(Errno::ESRCH) => {
                debug!(pid, signal = %signal, "Process no longer exists");
                Ok(())
            }
            Err(e) => Err(ProcessError::Signal {
                signal: signal.to_string(),
                pid,
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(unix)]
#[async_trait]
impl ProcessControl for UnixProcessControl {
    async fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        info!(pid, "Sending SIGTERM");
        Self::send(pid, nix::sys::signal::Signal::SIGTERM)
    }

    async fn force_kill(&self, pid: u32) -> Result<(), ProcessError> {
        info!(pid, "Sending SIGKILL");
        Self::send(pid, nix::sys::signal::Signal::SIGKILL)
    }

    fn exit_code(&self, status: &ExitStatus) -> Option<i32> {
        // None when the process was terminated by a signal
        status.code()
    }
}

/// Process-tree kill through TASKKILL
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsProcessControl;

#[cfg(windows)]
impl WindowsProcessControl {
    async fn taskkill(pid: u32) -> Result<(), ProcessError> {
        info!(pid, "Killing process tree with TASKKILL");
        let output = tokio::process::Command::new("CMD")
            .args(["/C", "TASKKILL", "/F", "/T", "/PID", &pid.to_string()])
            .output()
            .await?;

        if !output.status.success() {
            return Err(ProcessError::Signal {
                signal: "TASKKILL".to_string(),
                pid,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(windows)]
#[async_trait]
impl ProcessControl for WindowsProcessControl {
    async fn terminate(&self, pid: u32) -> Result<(), ProcessError> {
        Self::taskkill(pid).await
    }

    async fn force_kill(&self, pid: u32) -> Result<(), ProcessError> {
        Self::taskkill(pid).await
    }

    fn exit_code(&self, status: &ExitStatus) -> Option<i32> {
        status.code()
    }
}
