// Pseudo-terminal plumbing for commands that expect a TTY
use conveyor_core::port::ProcessError;
use nix::errno::Errno;
use nix::pty::{openpty, OpenptyResult, Winsize};
use nix::sys::termios::Termios;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::OwnedFd;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

const PTY_READ_SIZE: usize = 4096;

pub struct Pty {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

pub fn open() -> Result<Pty, ProcessError> {
    let OpenptyResult { master, slave } = openpty(None::<&Winsize>, None::<&Termios>)
        .map_err(|e| ProcessError::Pty(e.to_string()))?;
    Ok(Pty { master, slave })
}

/// Wire the slave side up as the command's stdio and controlling terminal
/// in a new session
///
/// The command keeps its own copies of the slave; drop it after spawning so
/// the master sees end-of-session once the child exits.
pub fn attach(command: &mut Command, slave: OwnedFd) -> Result<(), ProcessError> {
    command
        .stdin(Stdio::from(slave.try_clone()?))
        .stdout(Stdio::from(slave.try_clone()?))
        .stderr(Stdio::from(slave));

    // SAFETY: setsid and ioctl are async-signal-safe and touch no parent state.
    // Hooks run after stdio is wired up, so fd 0 is the slave.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid().map_err(io::Error::from)?;
            if nix::libc::ioctl(0, nix::libc::TIOCSCTTY as _, 0) == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
    Ok(())
}

/// Copy everything the child writes to the terminal into `tx`
///
/// Reading the master blocks, so this runs on the blocking pool. Once every
/// slave descriptor is closed the read fails with EIO; that is the normal end
/// of the session, not an error.
pub fn spawn_reader(master: OwnedFd, tx: mpsc::Sender<Vec<u8>>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut terminal = File::from(master);
        let mut buf = [0u8; PTY_READ_SIZE];

        loop {
            match terminal.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.raw_os_error() == Some(Errno::EIO as i32) => {
                    debug!("[PTY] Terminal session closed");
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "[PTY] Failed to read from terminal");
                    break;
                }
            }
        }
    })
}
