//! Line scanner
//!
//! Turns a raw output stream into discrete lines. Lines longer than the read
//! buffer are accumulated until their newline arrives and then processed once,
//! whole. Each line is optionally timestamped into an output buffer and handed
//! to the line callback when the callback filter accepts it.

use crate::domain::{LogLine, OutputBuffer};
use crate::port::TimeProvider;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Read buffer size; longer lines are stitched together from several reads
pub const READ_BUFFER_SIZE: usize = 4096;

/// Line callbacks allowed to run at once
pub const MAX_CONCURRENT_CALLBACKS: usize = 32;

pub type LinePreprocessor = Arc<dyn Fn(&str) -> String + Send + Sync>;
pub type LineFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;
pub type LineCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Per-line hooks
#[derive(Clone)]
pub struct LineHooks {
    pub preprocessor: LinePreprocessor,
    pub filter: LineFilter,
    pub callback: LineCallback,
}

impl Default for LineHooks {
    fn default() -> Self {
        Self {
            preprocessor: Arc::new(|line: &str| line.to_string()),
            filter: Arc::new(|_: &str| false),
            callback: Arc::new(|_: String| {}),
        }
    }
}

impl LineHooks {
    pub fn with_preprocessor(mut self, f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.preprocessor = Arc::new(f);
        self
    }

    pub fn with_filter(mut self, f: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.filter = Arc::new(f);
        self
    }

    pub fn with_callback(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.callback = Arc::new(f);
        self
    }
}

/// Counts from one scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub lines: usize,
    pub dispatched: usize,
}

pub struct LineScanner {
    hooks: LineHooks,
    time_provider: Arc<dyn TimeProvider>,
    timestamp_sink: Option<Arc<OutputBuffer>>,
    read_buffer_size: usize,
    callback_permits: Arc<Semaphore>,
}

impl LineScanner {
    pub fn new(hooks: LineHooks, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            hooks,
            time_provider,
            timestamp_sink: None,
            read_buffer_size: READ_BUFFER_SIZE,
            callback_permits: Arc::new(Semaphore::new(MAX_CONCURRENT_CALLBACKS)),
        }
    }

    /// Write timestamped lines into `sink`
    pub fn with_timestamps(mut self, sink: Arc<OutputBuffer>) -> Self {
        self.timestamp_sink = Some(sink);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Scan `reader` to EOF
    ///
    /// Returns once every dispatched callback has finished.
    pub async fn scan<R: AsyncRead + Unpin>(&self, reader: R) -> ScanSummary {
        debug!("[LineScanner] Starting to read lines");

        let mut reader = BufReader::with_capacity(self.read_buffer_size, reader);
        let mut callbacks = JoinSet::new();
        let mut summary = ScanSummary::default();
        let mut pending: Vec<u8> = Vec::new();
        let mut oversized = false;

        loop {
            let (consumed, complete) = {
                let available = match reader.fill_buf().await {
                    Ok(buf) => buf,
                    Err(e) => {
                        error!(error = %e, "[LineScanner] Failed to read");
                        break;
                    }
                };
                if available.is_empty() {
                    debug!("[LineScanner] Encountered EOF");
                    break;
                }

                match available.iter().position(|b| *b == b'\n') {
                    Some(newline) => {
                        pending.extend_from_slice(&available[..newline]);
                        (newline + 1, true)
                    }
                    None => {
                        pending.extend_from_slice(available);
                        (available.len(), false)
                    }
                }
            };
            reader.consume(consumed);

            if complete {
                if oversized {
                    debug!(bytes = pending.len(), "[LineScanner] Finished buffering long line");
                    oversized = false;
                }
                let mut line = std::mem::take(&mut pending);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                self.process_line(line, &mut callbacks, &mut summary).await;
            } else if !oversized && pending.len() >= self.read_buffer_size {
                debug!("[LineScanner] Line is too long to read, going to buffer it until it finishes");
                oversized = true;
            }
        }

        if !pending.is_empty() {
            self.process_line(pending, &mut callbacks, &mut summary)
                .await;
        }

        debug!("[LineScanner] Waiting for callbacks to finish");
        while let Some(joined) = callbacks.join_next().await {
            if let Err(e) = joined {
                error!("[LineScanner] Line callback failed: {:?}", e);
            }
        }

        debug!(lines = summary.lines, "[LineScanner] Finished");
        summary
    }

    async fn process_line(
        &self,
        bytes: Vec<u8>,
        callbacks: &mut JoinSet<()>,
        summary: &mut ScanSummary,
    ) {
        summary.lines += 1;

        let raw = String::from_utf8_lossy(&bytes).into_owned();
        let text = (self.hooks.preprocessor)(&raw);
        let line = LogLine::new(raw, text);

        // When timestamping, the filter runs here so header lines stay unstamped
        let mut accepted = None;
        if let Some(sink) = &self.timestamp_sink {
            let has_callback = (self.hooks.filter)(line.text());
            accepted = Some(has_callback);

            let stamp = if has_callback || line.is_structural_marker() {
                None
            } else {
                Some(self.time_provider.now())
            };
            sink.write_str(&line.render(stamp));
        }

        if accepted == Some(false) {
            return;
        }

        reap_finished(callbacks);
        let Ok(permit) = Arc::clone(&self.callback_permits).acquire_owned().await else {
            return;
        };
        summary.dispatched += 1;

        let hooks = self.hooks.clone();
        callbacks.spawn(async move {
            let _permit = permit;
            let text = line.into_text();
            if accepted == Some(true) || (hooks.filter)(&text) {
                (hooks.callback)(text);
            }
        });
    }
}

/// Drop finished callback tasks so the set only holds those still running
fn reap_finished(callbacks: &mut JoinSet<()>) {
    while let Some(joined) = callbacks.try_join_next() {
        if let Err(e) = joined {
            error!("[LineScanner] Line callback failed: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::time_provider::mocks::FixedTimeProvider;
    use crate::port::SystemTimeProvider;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    fn collecting_hooks(filter: impl Fn(&str) -> bool + Send + Sync + 'static) -> (LineHooks, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hooks = LineHooks::default()
            .with_filter(filter)
            .with_callback(move |line| sink.lock().unwrap().push(line));
        (hooks, seen)
    }

    #[tokio::test]
    async fn test_long_line_reconstructed_once() {
        let long = "x".repeat(100);
        let input = format!("first\n{}\nlast\n", long);
        let (hooks, seen) = collecting_hooks(|_| true);

        let scanner = LineScanner::new(hooks, Arc::new(SystemTimeProvider)).with_read_buffer_size(16);
        let summary = scanner.scan(input.as_bytes()).await;

        assert_eq!(summary.lines, 3);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        let mut expected = vec!["first".to_string(), long, "last".to_string()];
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_final_line_without_newline_and_crlf() {
        let (hooks, seen) = collecting_hooks(|_| true);
        let scanner = LineScanner::new(hooks, Arc::new(SystemTimeProvider));

        let summary = scanner.scan(&b"one\r\ntwo"[..]).await;

        assert_eq!(summary.lines, 2);
        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_timestamps_skip_markers_and_callback_lines() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let buffer = Arc::new(OutputBuffer::new());
        let (hooks, seen) = collecting_hooks(|line| line.starts_with("--- "));

        let scanner = LineScanner::new(hooks, Arc::new(FixedTimeProvider(at)))
            .with_timestamps(Arc::clone(&buffer));
        scanner
            .scan(&b"hello\n^^^ +++\n--- Running tests\nbye\n"[..])
            .await;

        assert_eq!(
            buffer.contents(),
            "[2024-01-02T03:04:05Z] hello\n\
             ^^^ +++\n\
             --- Running tests\n\
             [2024-01-02T03:04:05Z] bye\n"
        );
        assert_eq!(*seen.lock().unwrap(), vec!["--- Running tests".to_string()]);
    }

    #[tokio::test]
    async fn test_filter_rejects_without_timestamps() {
        let (hooks, seen) = collecting_hooks(|line| line.contains("keep"));
        let scanner = LineScanner::new(hooks, Arc::new(SystemTimeProvider));

        let summary = scanner.scan(&b"keep 1\ndrop\nkeep 2\n"[..]).await;

        assert_eq!(summary.lines, 3);
        assert_eq!(summary.dispatched, 3);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_preprocessor_feeds_callback_not_buffer() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let buffer = Arc::new(OutputBuffer::new());
        let (hooks, seen) = collecting_hooks(|_| true);
        let hooks = hooks.with_preprocessor(|line| line.replace("hunter2", "[REDACTED]"));

        let scanner = LineScanner::new(hooks, Arc::new(FixedTimeProvider(at)))
            .with_timestamps(Arc::clone(&buffer));
        scanner.scan(&b"password=hunter2\n"[..]).await;

        assert_eq!(buffer.contents(), "password=hunter2\n");
        assert_eq!(*seen.lock().unwrap(), vec!["password=[REDACTED]".to_string()]);
    }

    #[tokio::test]
    async fn test_finished_callbacks_are_reaped() {
        let mut callbacks = JoinSet::new();
        for _ in 0..100 {
            callbacks.spawn(async {});
        }
        let (release, blocked) = tokio::sync::oneshot::channel::<()>();
        callbacks.spawn(async move {
            let _ = blocked.await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        reap_finished(&mut callbacks);
        assert_eq!(callbacks.len(), 1);

        release.send(()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        reap_finished(&mut callbacks);
        assert!(callbacks.is_empty());
    }
}
