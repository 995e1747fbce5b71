//! Tokio-backed job queue.

use super::{Job, JobError, JobHandle, JobQueue, JobStatus, RetryPolicy};
use crate::types::{TaskId, abbrev_uuid};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Runs each submitted job on its own tokio task.
///
/// Finished handles stay queryable for `retention`, then are dropped on the
/// next submission.
pub struct TokioJobQueue {
    policy: Arc<dyn RetryPolicy>,
    permits: Option<Arc<Semaphore>>,
    retention: Duration,
    handles: DashMap<TaskId, JobHandle>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl TokioJobQueue {
    pub fn new(policy: Arc<dyn RetryPolicy>) -> Self {
        Self {
            policy,
            permits: None,
            retention: Duration::from_secs(3600),
            handles: DashMap::new(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Limit how many attempts execute at once
    pub fn with_max_concurrent(mut self, max_concurrent: Option<usize>) -> Self {
        self.permits = max_concurrent.map(|n| Arc::new(Semaphore::new(n)));
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.policy
    }

    /// Cancel every pending job and wait for executing attempts to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down job queue ({} task(s) alive)", self.tracker.len());
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn prune_finished(&self) {
        let Ok(retention) = chrono::Duration::from_std(self.retention) else {
            return;
        };
        let cutoff = Utc::now() - retention;
        self.handles
            .retain(|_, handle| handle.status().finished_at().is_none_or(|finished| finished > cutoff));
    }
}

impl JobQueue for TokioJobQueue {
    fn submit(&self, job: Arc<dyn Job>) -> JobHandle {
        self.prune_finished();

        let handle = JobHandle::new(job.kind(), self.shutdown.child_token());
        self.handles.insert(handle.id(), handle.clone());
        debug!("Submitted {} task {}", job.kind(), abbrev_uuid(&handle.id()));

        let span = info_span!("task", task_id = %abbrev_uuid(&handle.id()), kind = job.kind());
        self.tracker.spawn(
            drive(job, handle.clone(), self.policy.clone(), self.permits.clone()).instrument(span),
        );
        handle
    }

    fn get(&self, id: TaskId) -> Option<JobHandle> {
        self.handles.get(&id).map(|entry| entry.value().clone())
    }
}

fn mark_cancelled(handle: &JobHandle) {
    if handle.transition(|status| status.is_pending().then(|| JobStatus::Cancelled { finished_at: Utc::now() })) {
        info!("Task cancelled before its next attempt");
    }
}

/// Wait for a concurrency permit, unless cancelled first
async fn acquire(permits: &Option<Arc<Semaphore>>, cancel: &CancellationToken) -> Result<Option<OwnedSemaphorePermit>, ()> {
    let Some(semaphore) = permits else {
        return if cancel.is_cancelled() { Err(()) } else { Ok(None) };
    };
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(()),
        permit = semaphore.clone().acquire_owned() => permit.map(Some).map_err(|_| ()),
    }
}

async fn drive(job: Arc<dyn Job>, handle: JobHandle, policy: Arc<dyn RetryPolicy>, permits: Option<Arc<Semaphore>>) {
    let cancel = handle.cancellation().clone();
    let mut attempt = 0u32;

    loop {
        let Ok(permit) = acquire(&permits, &cancel).await else {
            mark_cancelled(&handle);
            return;
        };

        attempt += 1;
        let claimed = handle.transition(|status| status.is_pending().then_some(JobStatus::Running { attempt }));
        if !claimed {
            // Cancelled between the permit and the claim
            return;
        }

        let error = match job.run().await {
            Ok(()) => {
                info!(attempt, "Task succeeded");
                handle.set(JobStatus::Succeeded {
                    attempts: attempt,
                    finished_at: Utc::now(),
                });
                return;
            }
            Err(JobError::Permanent(e)) => {
                warn!(attempt, error = %e, "Task failed permanently");
                handle.set(JobStatus::Failed {
                    attempts: attempt,
                    error: e.to_string(),
                    finished_at: Utc::now(),
                });
                return;
            }
            Err(JobError::Transient(e)) => e,
        };

        let Some(delay) = policy.next_delay(attempt - 1) else {
            error!(attempt, error = %error, "Task failed, no retries remaining");
            handle.set(JobStatus::Failed {
                attempts: attempt,
                error: error.to_string(),
                finished_at: Utc::now(),
            });
            return;
        };

        let retry_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| Utc::now().checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        warn!(attempt, error = %error, delay = ?delay, "Task failed, retrying");
        handle.set(JobStatus::Retrying {
            attempt,
            retry_at,
            last_error: error.to_string(),
        });
        drop(permit);

        tokio::select! {
            _ = cancel.cancelled() => {
                mark_cancelled(&handle);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::FixedDelay;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails transiently `failures` times, then succeeds
    #[derive(Default)]
    struct Flaky {
        failures: u32,
        permanent: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Job for Flaky {
        fn kind(&self) -> &'static str {
            "flaky"
        }

        async fn run(&self) -> Result<(), JobError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                let e = anyhow::anyhow!("attempt {} failed", call + 1);
                return Err(if self.permanent { JobError::Permanent(e) } else { JobError::Transient(e) });
            }
            Ok(())
        }
    }

    fn queue(delay: Duration, max_retries: u32) -> TokioJobQueue {
        TokioJobQueue::new(Arc::new(FixedDelay { delay, max_retries }))
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_after_delay() {
        let queue = queue(Duration::from_secs(60), 3);
        let job = Arc::new(Flaky {
            failures: 2,
            ..Default::default()
        });

        let started = tokio::time::Instant::now();
        let handle = queue.submit(job.clone());
        let status = handle.wait().await;

        assert!(matches!(status, JobStatus::Succeeded { attempts: 3, .. }));
        assert_eq!(job.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_when_policy_is_exhausted() {
        let queue = queue(Duration::from_secs(1), 2);
        let job = Arc::new(Flaky {
            failures: u32::MAX,
            ..Default::default()
        });

        let status = queue.submit(job.clone()).wait().await;
        match status {
            JobStatus::Failed { attempts, error, .. } => {
                assert_eq!(attempts, 3);
                assert_eq!(error, "attempt 3 failed");
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let queue = queue(Duration::from_secs(1), 5);
        let job = Arc::new(Flaky {
            failures: 1,
            permanent: true,
            ..Default::default()
        });

        let status = queue.submit(job.clone()).wait().await;
        assert!(matches!(status, JobStatus::Failed { attempts: 1, .. }));
        assert_eq!(job.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let queue = queue(Duration::from_secs(60), 3);
        let job = Arc::new(Flaky {
            failures: 1,
            ..Default::default()
        });

        let handle = queue.submit(job.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(matches!(handle.status(), JobStatus::Retrying { attempt: 1, .. }));

        assert!(handle.cancel());
        assert!(matches!(handle.wait().await, JobStatus::Cancelled { .. }));
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(job.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_queued_job_never_runs() {
        // No permits: every job stays queued
        let queue = queue(Duration::from_secs(1), 3).with_max_concurrent(Some(0));
        let job = Arc::new(Flaky::default());

        let queued = queue.submit(job.clone());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(queued.status(), JobStatus::Queued);

        assert!(queued.cancel());
        assert!(matches!(queued.wait().await, JobStatus::Cancelled { .. }));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(job.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_jobs() {
        let queue = queue(Duration::from_secs(60), 3);
        let handle = queue.submit(Arc::new(Flaky {
            failures: 1,
            ..Default::default()
        }));
        tokio::time::sleep(Duration::from_secs(1)).await;

        queue.shutdown().await;
        assert!(matches!(handle.status(), JobStatus::Cancelled { .. }));
        assert!(queue.get(handle.id()).is_some());
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let queue = queue(Duration::from_secs(1), 0);
        assert!(queue.get(uuid::Uuid::new_v4()).is_none());
    }
}
