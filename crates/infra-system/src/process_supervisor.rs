// Process supervisor
// reason: tokio::process for async spawn/wait, nix pseudo-terminals on unix
use conveyor_core::application::line_scanner::{LineHooks, LineScanner, READ_BUFFER_SIZE};
use conveyor_core::domain::process::INDETERMINATE_EXIT_STATUS;
use conveyor_core::domain::{DoneSignal, OutputBuffer, ProcessHandle};
use conveyor_core::port::{ProcessControl, ProcessError, SystemTimeProvider, TimeProvider};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::process_control_impl::default_process_control;

/// Ceiling on the wait for output processing after the command exits
///
/// Some filesystems never report end-of-stream on output pipes.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const CHUNK_CHANNEL_CAPACITY: usize = 64;

pub type StartCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// What to run and how to capture it
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    pub argv: Vec<String>,
    /// Overlaid on the inherited environment
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Attach the command to a pseudo-terminal instead of pipes
    pub pty: bool,
    pub timestamp_lines: bool,
}

impl ProcessConfig {
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }
}

/// Runs one command and captures its output
///
/// One supervisor runs its command at most once. Share it behind an `Arc` to
/// call `kill`, `output` or `done` while `start` is still waiting.
pub struct ProcessSupervisor {
    config: ProcessConfig,
    hooks: LineHooks,
    on_start: Option<StartCallback>,
    control: Arc<dyn ProcessControl>,
    time_provider: Arc<dyn TimeProvider>,
    drain_timeout: Duration,
    handle: ProcessHandle,
}

impl ProcessSupervisor {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            hooks: LineHooks::default(),
            on_start: None,
            control: default_process_control(),
            time_provider: Arc::new(SystemTimeProvider),
            drain_timeout: DRAIN_TIMEOUT,
            handle: ProcessHandle::new(),
        }
    }

    pub fn with_line_hooks(mut self, hooks: LineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Called with the PID once the child is running
    pub fn with_start_callback(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    pub fn with_process_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = control;
        self
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.time_provider = time_provider;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn pid(&self) -> Option<u32> {
        self.handle.pid()
    }

    /// Legacy liveness flag; prefer `done()`
    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    /// Fires once the command has exited and its output is processed
    pub fn done(&self) -> DoneSignal {
        self.handle.done()
    }

    /// Captured output so far
    pub fn output(&self) -> String {
        self.handle.buffer().contents()
    }

    /// Captured bytes from `offset` onwards, for incremental streaming
    pub fn output_since(&self, offset: usize) -> Vec<u8> {
        self.handle.buffer().bytes_since(offset)
    }

    /// Decimal exit status; "-1" until known or if indeterminate
    pub fn exit_status(&self) -> String {
        self.handle.exit_status()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.handle.exit_code()
    }

    /// Spawn the command and wait for it to exit
    ///
    /// The completion signal fires even when spawning fails.
    pub async fn start(&self) -> Result<(), ProcessError> {
        if !self.handle.try_claim() {
            return Err(ProcessError::AlreadyStarted);
        }

        let result = self.run().await;
        if let Err(e) = &result {
            error!(error = %e, argv = ?self.config.argv, "Failed to start process");
            self.handle.finish(1);
        }
        result
    }

    /// Terminate, then force-kill if still alive after `grace`
    pub async fn kill(&self, grace: Duration) -> Result<(), ProcessError> {
        let Some(pid) = self.handle.pid() else {
            debug!("No process to kill");
            return Ok(());
        };

        let mut done = self.handle.done();
        if done.is_done() {
            return Ok(());
        }
        // Reaped but still draining output; the pid may already be reused
        if !self.handle.is_running() {
            debug!(pid, "Process already exited");
            return Ok(());
        }

        self.control.terminate(pid).await?;

        tokio::select! {
            _ = done.wait() => {
                debug!(pid, "Process exited after termination signal");
                Ok(())
            }
            _ = tokio::time::sleep(grace) => {
                if !self.handle.is_running() {
                    debug!(pid, "Process exited; still processing output");
                    return Ok(());
                }
                warn!(pid, grace_secs = grace.as_secs_f64(), "Process did not exit in time, killing it");
                self.control.force_kill(pid).await
            }
        }
    }

    async fn run(&self) -> Result<(), ProcessError> {
        let (program, args) = self
            .config
            .argv
            .split_first()
            .ok_or(ProcessError::EmptyCommand)?;

        let mut command = Command::new(program);
        command.args(args).envs(&self.config.env);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let (tx, rx) = mpsc::channel::<Vec<u8>>(CHUNK_CHANNEL_CAPACITY);
        let mut readers = Vec::new();

        let mut child = if self.config.pty {
            self.spawn_in_pty(command, tx, &mut readers)?
        } else {
            self.spawn_piped(command, tx, &mut readers)?
        };

        let pid = child.id().unwrap_or_default();
        self.handle.mark_running(pid);
        info!(pid, argv = ?self.config.argv, pty = self.config.pty, "Process is running");

        if let Some(on_start) = &self.on_start {
            let on_start = Arc::clone(on_start);
            tokio::spawn(async move { on_start(pid) });
        }

        let (pipeline, aborts) = self.start_pipeline(rx, readers);

        let status = child.wait().await;
        self.handle.mark_exited();

        let exit_code = match status {
            Ok(status) if status.success() => 0,
            Ok(status) => match self.control.exit_code(&status) {
                Some(code) => code,
                None => {
                    error!(pid, status = %status, "Unable to determine exit code");
                    INDETERMINATE_EXIT_STATUS
                }
            },
            Err(e) => {
                error!(pid, error = %e, "Failed waiting for process");
                INDETERMINATE_EXIT_STATUS
            }
        };
        info!(pid, exit_code, "Process finished");

        match tokio::time::timeout(self.drain_timeout, pipeline).await {
            Ok(()) => debug!(pid, "Output processing finished"),
            Err(_) => {
                error!(
                    pid,
                    timeout_secs = self.drain_timeout.as_secs(),
                    "Timed out waiting for output processing; continuing with captured output"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        self.handle.finish(exit_code);
        Ok(())
    }

    fn spawn_piped(
        &self,
        mut command: Command,
        tx: mpsc::Sender<Vec<u8>>,
        readers: &mut Vec<JoinHandle<()>>,
    ) -> Result<Child, ProcessError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(e.to_string()))?;

        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward(stderr, tx)));
        }

        Ok(child)
    }

    #[cfg(unix)]
    fn spawn_in_pty(
        &self,
        mut command: Command,
        tx: mpsc::Sender<Vec<u8>>,
        readers: &mut Vec<JoinHandle<()>>,
    ) -> Result<Child, ProcessError> {
        let pty = crate::pty::open()?;
        crate::pty::attach(&mut command, pty.slave)?;

        let child = command
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(e.to_string()))?;
        // Release our copies of the slave side
        drop(command);

        readers.push(crate::pty::spawn_reader(pty.master, tx));
        Ok(child)
    }

    #[cfg(not(unix))]
    fn spawn_in_pty(
        &self,
        _command: Command,
        _tx: mpsc::Sender<Vec<u8>>,
        _readers: &mut Vec<JoinHandle<()>>,
    ) -> Result<Child, ProcessError> {
        Err(ProcessError::Pty(
            "pseudo-terminals are not supported on this platform".to_string(),
        ))
    }

    /// Output readers -> buffer and line scanner
    ///
    /// Returns a future that completes when every stage has finished, plus
    /// handles to abort the async stages if that takes too long.
    fn start_pipeline(
        &self,
        rx: mpsc::Receiver<Vec<u8>>,
        readers: Vec<JoinHandle<()>>,
    ) -> (impl std::future::Future<Output = ()>, Vec<AbortHandle>) {
        let buffer = Arc::clone(self.handle.buffer());
        let (writer, reader) = tokio::io::duplex(READ_BUFFER_SIZE);

        let mut scanner = LineScanner::new(self.hooks.clone(), Arc::clone(&self.time_provider));
        let raw_sink = if self.config.timestamp_lines {
            scanner = scanner.with_timestamps(buffer);
            None
        } else {
            Some(buffer)
        };

        let pump = tokio::spawn(pump(rx, raw_sink, writer));
        let scan = tokio::spawn(async move { scanner.scan(reader).await });

        let mut aborts: Vec<AbortHandle> = readers.iter().map(JoinHandle::abort_handle).collect();
        aborts.push(pump.abort_handle());
        aborts.push(scan.abort_handle());

        let pipeline = async move {
            for reader in readers {
                let _ = reader.await;
            }
            let _ = pump.await;
            match scan.await {
                Ok(summary) => debug!(lines = summary.lines, "Line scanner finished"),
                Err(e) => error!("Line scanner failed: {:?}", e),
            }
        };

        (pipeline, aborts)
    }
}

/// Copy one output stream into the chunk channel
async fn forward<R: AsyncRead + Unpin>(mut stream: R, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                debug!(error = %e, "Output stream closed with error");
                break;
            }
        }
    }
}

/// Fan chunks out to the raw buffer and the line scanner
async fn pump(
    mut rx: mpsc::Receiver<Vec<u8>>,
    raw_sink: Option<Arc<OutputBuffer>>,
    mut scanner_input: DuplexStream,
) {
    let mut scanner_alive = true;
    while let Some(chunk) = rx.recv().await {
        if let Some(buffer) = &raw_sink {
            buffer.write(&chunk);
        }
        if scanner_alive && scanner_input.write_all(&chunk).await.is_err() {
            warn!("Line scanner stopped reading; output is still captured");
            scanner_alive = false;
        }
    }
    let _ = scanner_input.shutdown().await;
}
