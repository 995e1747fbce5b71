//! API response models for background tasks.

use crate::tasks::{JobHandle, JobStatus};
use crate::types::TaskId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// A submitted background task and its current status.
///
/// The status fields are inlined, e.g.
/// `{"id": "...", "kind": "migration", "status": "retrying", "attempt": 1, ...}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TaskResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TaskId,
    /// What the task does, e.g. `migration`
    pub kind: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl From<&JobHandle> for TaskResponse {
    fn from(handle: &JobHandle) -> Self {
        Self {
            id: handle.id(),
            kind: handle.kind().to_string(),
            submitted_at: handle.submitted_at(),
            status: handle.status(),
        }
    }
}
