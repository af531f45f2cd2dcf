//! Deadline-bounded execution of blocking generation calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{self, JoinError};
use tracing::warn;

use crate::{EaselError, Result};

/// Runs blocking work with an optional wall-clock deadline.
///
/// Generation calls offer no cooperative cancellation, so a timeout only
/// stops the *waiting*: the worker keeps running on the blocking pool and
/// its eventual result is discarded. To keep abandoned workers from piling
/// up, every call holds a semaphore permit for as long as the work actually
/// runs; once `max_inflight` workers are live (including abandoned ones)
/// new calls wait for a permit before starting.
pub struct BoundedExecutor {
    deadline: Option<Duration>,
    inflight: Arc<Semaphore>,
}

impl BoundedExecutor {
    pub fn new(deadline: Option<Duration>, max_inflight: usize) -> Self {
        Self {
            deadline,
            inflight: Arc::new(Semaphore::new(max_inflight.max(1))),
        }
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Run `work` to completion, or until the deadline expires.
    ///
    /// Without a deadline the caller simply waits for the result. With one,
    /// the work races a timer; on expiry the caller gets
    /// [`EaselError::Timeout`] immediately. Errors raised by the work (and
    /// worker panics) surface as [`EaselError::Generation`].
    pub async fn run<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.inflight)
            .acquire_owned()
            .await
            .map_err(|err| EaselError::Generation(anyhow::Error::new(err)))?;

        // The permit moves into the worker so an abandoned-but-running
        // generation keeps counting against the in-flight cap.
        let worker = task::spawn_blocking(move || {
            let result = work();
            drop(permit);
            result
        });

        match self.deadline {
            None => flatten(worker.await),
            Some(deadline) => match tokio::time::timeout(deadline, worker).await {
                Ok(joined) => flatten(joined),
                Err(_) => {
                    warn!(?deadline, "generation exceeded deadline, abandoning worker");
                    Err(EaselError::Timeout { deadline })
                }
            },
        }
    }
}

fn flatten<T>(joined: std::result::Result<anyhow::Result<T>, JoinError>) -> Result<T> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(EaselError::Generation(err)),
        Err(join_err) => Err(EaselError::Generation(anyhow::Error::new(join_err))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn no_deadline_runs_to_completion() {
        let executor = BoundedExecutor::new(None, 1);
        let value = executor
            .run(|| {
                std::thread::sleep(Duration::from_millis(50));
                Ok(7)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn fast_work_beats_the_deadline() {
        let executor = BoundedExecutor::new(Some(Duration::from_secs(5)), 1);
        let value = executor.run(|| Ok("done")).await.unwrap();
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn slow_work_times_out_promptly() {
        let deadline = Duration::from_millis(50);
        let executor = BoundedExecutor::new(Some(deadline), 1);

        let started = Instant::now();
        let err = executor
            .run(|| {
                std::thread::sleep(Duration::from_millis(500));
                Ok(())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, EaselError::Timeout { .. }));
        // The caller must not have waited for the worker to finish.
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn work_errors_are_not_timeouts() {
        let executor = BoundedExecutor::new(Some(Duration::from_secs(5)), 1);
        let err = executor
            .run(|| -> anyhow::Result<()> { anyhow::bail!("bad internal state") })
            .await
            .unwrap_err();
        match err {
            EaselError::Generation(source) => {
                assert!(source.to_string().contains("bad internal state"));
            }
            other => panic!("expected Generation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn worker_panics_surface_as_failures() {
        let executor = BoundedExecutor::new(None, 1);
        let err = executor
            .run(|| -> anyhow::Result<()> { panic!("kaboom") })
            .await
            .unwrap_err();
        assert!(matches!(err, EaselError::Generation(_)));
    }

    #[tokio::test]
    async fn abandoned_worker_holds_its_permit() {
        let executor = BoundedExecutor::new(Some(Duration::from_millis(20)), 1);

        let err = executor
            .run(|| {
                std::thread::sleep(Duration::from_millis(150));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EaselError::Timeout { .. }));

        // The next call queues behind the abandoned worker's permit
        // instead of running alongside it.
        let started = Instant::now();
        executor.run(|| Ok(())).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
