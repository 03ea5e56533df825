// Process handle: shared state for one supervised command

use crate::domain::output::OutputBuffer;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

/// Exit status reported when the real one cannot be determined
pub const INDETERMINATE_EXIT_STATUS: i32 = -1;

/// Lifecycle of a supervised command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Lifecycle {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Exited = 3,
}

impl Lifecycle {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Lifecycle::Idle,
            1 => Lifecycle::Starting,
            2 => Lifecycle::Running,
            _ => Lifecycle::Exited,
        }
    }
}

/// Atomic lifecycle cell; only transitions are exposed
#[derive(Debug)]
struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    fn new() -> Self {
        Self(AtomicU8::new(Lifecycle::Idle as u8))
    }

    fn load(&self) -> Lifecycle {
        Lifecycle::from_u8(self.0.load(Ordering::Acquire))
    }

    fn claim(&self) -> bool {
        self.0
            .compare_exchange(
                Lifecycle::Idle as u8,
                Lifecycle::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn store(&self, state: Lifecycle) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Completion signal; once done it stays done
#[derive(Debug, Clone)]
pub struct DoneSignal {
    rx: watch::Receiver<bool>,
}

impl DoneSignal {
    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the command has fully exited
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|done| *done).await;
    }
}

/// State for one spawned command
///
/// Created before spawn and never reused. The PID and exit status are set at
/// most once; after `finish` nothing but reads happen.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: OnceLock<u32>,
    lifecycle: LifecycleCell,
    buffer: Arc<OutputBuffer>,
    exit_code: OnceLock<i32>,
    done_tx: watch::Sender<bool>,
}

impl Default for ProcessHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessHandle {
    pub fn new() -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            pid: OnceLock::new(),
            lifecycle: LifecycleCell::new(),
            buffer: Arc::new(OutputBuffer::new()),
            exit_code: OnceLock::new(),
            done_tx,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid.get().copied()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.load()
    }

    /// Legacy liveness flag, superseded by `done()`
    pub fn is_running(&self) -> bool {
        self.lifecycle.load() == Lifecycle::Running
    }

    pub fn buffer(&self) -> &Arc<OutputBuffer> {
        &self.buffer
    }

    /// Claim the handle for a start; false if it was ever started before
    pub fn try_claim(&self) -> bool {
        self.lifecycle.claim()
    }

    pub fn mark_running(&self, pid: u32) {
        let _ = self.pid.set(pid);
        self.lifecycle.store(Lifecycle::Running);
    }

    pub fn mark_exited(&self) {
        self.lifecycle.store(Lifecycle::Exited);
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code.get().copied()
    }

    /// Decimal exit status, "-1" if indeterminate
    pub fn exit_status(&self) -> String {
        self.exit_code()
            .unwrap_or(INDETERMINATE_EXIT_STATUS)
            .to_string()
    }

    pub fn done(&self) -> DoneSignal {
        DoneSignal {
            rx: self.done_tx.subscribe(),
        }
    }

    /// Finalize the exit status and fire the completion signal exactly once
    pub fn finish(&self, exit_code: i32) {
        let _ = self.exit_code.set(exit_code);
        self.lifecycle.store(Lifecycle::Exited);
        self.done_tx.send_if_modified(|done| {
            if *done {
                false
            } else {
                *done = true;
                true
            }
        });
    }
}
