// Bounded worker pool
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// Default number of concurrent uploads
pub const DEFAULT_POOL_CAPACITY: usize = 10;

/// Runs at most `capacity` tasks at once
///
/// `spawn` waits for a free slot, so a producer looping over thousands of
/// items never has more than `capacity` tasks alive.
pub struct WorkerPool<T> {
    permits: Arc<Semaphore>,
    tasks: JoinSet<T>,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Spawn a task once a slot frees up
    pub async fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        // The semaphore is never closed, so acquire only fails if it were
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            error!("Worker pool semaphore closed; dropping task");
            return;
        };

        self.tasks.spawn(async move {
            let _permit = permit;
            task.await
        });
    }

    /// Wait for every spawned task
    ///
    /// Returns the outputs of tasks that completed and the number that
    /// panicked or were cancelled.
    pub async fn wait(mut self) -> (Vec<T>, usize) {
        let mut outputs = Vec::new();
        let mut failed = 0;

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(output) => outputs.push(output),
                Err(join_err) => {
                    failed += 1;
                    if join_err.is_panic() {
                        error!("Pool task panicked: {:?}", join_err);
                    } else {
                        error!("Pool task cancelled: {:?}", join_err);
                    }
                }
            }
        }

        (outputs, failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_caps_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pool = WorkerPool::new(3);

        for i in 0..12 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            pool.spawn(async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i
            })
            .await;
        }

        let (mut outputs, failed) = pool.wait().await;
        outputs.sort();

        assert_eq!(failed, 0);
        assert_eq!(outputs, (0..12).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_stop_siblings() {
        let mut pool = WorkerPool::new(2);
        pool.spawn(async { 1 }).await;
        pool.spawn(async { panic!("boom") }).await;
        pool.spawn(async { 3 }).await;

        let (mut outputs, failed) = pool.wait().await;
        outputs.sort();

        assert_eq!(outputs, vec![1, 3]);
        assert_eq!(failed, 1);
    }
}
