// Conveyor Infrastructure - System Adapters
// Implements: ProcessControl, plus the process supervisor built on it

pub mod process_control_impl;
pub mod process_supervisor;
#[cfg(unix)]
pub mod pty;

#[cfg(unix)]
pub use process_control_impl::UnixProcessControl;
#[cfg(windows)]
pub use process_control_impl::WindowsProcessControl;
pub use process_control_impl::default_process_control;
pub use process_supervisor::{ProcessConfig, ProcessSupervisor, StartCallback, DRAIN_TIMEOUT};
