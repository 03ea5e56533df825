// Retry logic
// Fixed-interval retries with optional jitter and early abort
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Upper bound of the random delay added when jitter is enabled
const JITTER_CEILING_MS: u64 = 1000;

/// Retry configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub maximum: u32,
    /// Wait between attempts
    pub interval: Duration,
    /// Add up to one second of random delay to each wait
    pub jitter: bool,
}

impl RetryConfig {
    pub const fn new(maximum: u32, interval: Duration) -> Self {
        Self {
            maximum,
            interval,
            jitter: false,
        }
    }

    pub const fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before the next attempt
    pub fn next_delay(&self) -> Duration {
        if self.jitter {
            let extra = rand::thread_rng().gen_range(0..JITTER_CEILING_MS);
            self.interval + Duration::from_millis(extra)
        } else {
            self.interval
        }
    }
}

/// State of the current attempt, handed to the operation
///
/// Calling `break_retries` makes the current failure final no matter how
/// many attempts remain.
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    attempt: u32,
    maximum: u32,
    interval: Duration,
    started: Instant,
    broken: Arc<AtomicBool>,
}

impl RetryAttempt {
    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn maximum(&self) -> u32 {
        self.maximum
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Time since the first attempt started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_last(&self) -> bool {
        self.attempt >= self.maximum
    }

    /// Abandon all remaining attempts
    pub fn break_retries(&self) {
        self.broken.store(true, Ordering::Release);
    }

    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

impl fmt::Display for RetryAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Attempt {}/{}", self.attempt, self.maximum)?;
        if !self.is_last() && !self.is_broken() {
            write!(f, " Retrying in {:?}", self.interval)?;
        }
        Ok(())
    }
}

/// Run `operation` until it succeeds, breaks, or runs out of attempts
///
/// Returns the first success or the last error.
///
/// # Example
/// ```text
/// let config = RetryConfig::new(5, Duration::from_secs(1));
/// retry(&config, |attempt| async move {
///     let result = client.upload(&batch).await;
///     if let Err(e) = &result {
///         warn!("{} ({})", e, attempt);
///         if e.is_unrecoverable() {
///             attempt.break_retries();
///         }
///     }
///     result
/// })
/// .await?;
/// ```
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut(RetryAttempt) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let maximum = config.maximum.max(1);
    let broken = Arc::new(AtomicBool::new(false));
    let started = Instant::now();
    let mut attempt = 1;

    loop {
        let state = RetryAttempt {
            attempt,
            maximum,
            interval: config.interval,
            started,
            broken: Arc::clone(&broken),
        };

        match operation(state).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if broken.load(Ordering::Acquire) {
                    debug!(attempt, maximum, "Retries broken by operation");
                    return Err(err);
                }
                if attempt >= maximum {
                    return Err(err);
                }
            }
        }

        let delay = config.next_delay();
        debug!(
            attempt,
            maximum,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        sleep(delay).await;
        attempt += 1;
    }
}
