//! Background job dispatch.
//!
//! A [`Job`] is submitted to a [`JobQueue`], which runs it on the tokio runtime
//! and retries transient failures according to an injected [`RetryPolicy`].
//! Submission returns a [`JobHandle`] for observing and cancelling the job.
//!
//! ```text
//! queued ──► running ──► succeeded
//!   │           │  ▲
//!   │           ▼  │
//!   │        retrying ──► failed
//!   │           │
//!   └───────────┴──► cancelled
//! ```
//!
//! Cancellation only applies to jobs that are not currently executing.

pub mod migration_job;
pub mod queue;
pub mod retry;

pub use migration_job::MigrationJob;
pub use queue::TokioJobQueue;
pub use retry::{ExponentialBackoff, FixedDelay, RetryPolicy};

use crate::types::TaskId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

/// How a job attempt failed
#[derive(Error, Debug)]
pub enum JobError {
    /// Worth retrying
    #[error("{0}")]
    Transient(#[source] anyhow::Error),

    /// Retrying cannot help
    #[error("{0}")]
    Permanent(#[source] anyhow::Error),
}

impl JobError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, JobError::Permanent(_))
    }
}

/// A unit of background work. `run` may be called more than once.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Short label for logs and status responses
    fn kind(&self) -> &'static str;

    async fn run(&self) -> Result<(), JobError>;
}

/// Lifecycle of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, first attempt not started
    Queued,
    Running {
        attempt: u32,
    },
    /// Last attempt failed transiently; the next one starts at `retry_at`
    Retrying {
        attempt: u32,
        retry_at: DateTime<Utc>,
        last_error: String,
    },
    Succeeded {
        attempts: u32,
        finished_at: DateTime<Utc>,
    },
    Failed {
        attempts: u32,
        error: String,
        finished_at: DateTime<Utc>,
    },
    Cancelled {
        finished_at: DateTime<Utc>,
    },
}

impl JobStatus {
    /// Waiting for an attempt, hence cancellable
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Retrying { .. })
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at().is_some()
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self {
            JobStatus::Succeeded { finished_at, .. }
            | JobStatus::Failed { finished_at, .. }
            | JobStatus::Cancelled { finished_at } => Some(*finished_at),
            _ => None,
        }
    }
}

/// Shared view of one submitted job.
///
/// Clones observe the same job. Status transitions go through the watch
/// channel's lock, so a cancel can never interleave with a job being claimed
/// for an attempt.
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: TaskId,
    kind: &'static str,
    submitted_at: DateTime<Utc>,
    status: Arc<watch::Sender<JobStatus>>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub(crate) fn new(kind: &'static str, cancel: CancellationToken) -> Self {
        let (status, _) = watch::channel(JobStatus::Queued);
        Self {
            id: TaskId::new_v4(),
            kind,
            submitted_at: Utc::now(),
            status: Arc::new(status),
            cancel,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn status(&self) -> JobStatus {
        self.status.borrow().clone()
    }

    /// Cancel the job if it is waiting for an attempt.
    ///
    /// Returns `false` when the job is executing or already finished; an
    /// executing attempt always runs to completion.
    pub fn cancel(&self) -> bool {
        let cancelled = self.transition(|status| {
            status.is_pending().then(|| JobStatus::Cancelled { finished_at: Utc::now() })
        });
        if cancelled {
            // Wake the worker if it is sleeping through a backoff
            self.cancel.cancel();
        }
        cancelled
    }

    /// Wait until the job finishes and return its final status
    pub async fn wait(&self) -> JobStatus {
        let mut receiver = self.status.subscribe();
        match receiver.wait_for(JobStatus::is_finished).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        }
    }

    /// Apply `next` atomically; returns whether the status changed
    pub(crate) fn transition<F>(&self, next: F) -> bool
    where
        F: FnOnce(&JobStatus) -> Option<JobStatus>,
    {
        self.status.send_if_modified(|status| match next(status) {
            Some(new) => {
                *status = new;
                true
            }
            None => false,
        })
    }

    pub(crate) fn set(&self, status: JobStatus) {
        self.status.send_replace(status);
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Accepts jobs for background execution.
pub trait JobQueue: Send + Sync {
    fn submit(&self, job: Arc<dyn Job>) -> JobHandle;

    /// Look up a previously submitted job
    fn get(&self, id: TaskId) -> Option<JobHandle>;
}
