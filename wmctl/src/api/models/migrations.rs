//! API request/response models for migrations.

use super::pagination::Pagination;
use crate::config::RunMode;
use crate::db::models::migrations::{MigrationDBResponse, MigrationState};
use crate::types::{MigrationId, MigrationTargetId, MountPointId, TaskId, WorkloadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListMigrationsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only migrations in this state
    #[param(inline)]
    pub state: Option<MigrationState>,

    /// Only migrations from this source workload
    #[param(value_type = Option<String>, format = "uuid")]
    pub source_workload_id: Option<WorkloadId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MigrationCreate {
    #[schema(value_type = String, format = "uuid")]
    pub source_workload_id: WorkloadId,
    #[schema(value_type = String, format = "uuid")]
    pub migration_target_id: MigrationTargetId,
    /// Mount points of the source workload to copy
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub selected_mount_points: Vec<MountPointId>,
}

/// Change a migration's target or selection. Refused while it is running.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MigrationUpdate {
    #[schema(value_type = Option<String>, format = "uuid")]
    pub migration_target_id: Option<MigrationTargetId>,
    #[schema(value_type = Option<Vec<String>>)]
    pub selected_mount_points: Option<Vec<MountPointId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MigrationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MigrationId,
    #[schema(value_type = String, format = "uuid")]
    pub source_workload_id: WorkloadId,
    #[schema(value_type = String, format = "uuid")]
    pub migration_target_id: MigrationTargetId,
    #[schema(value_type = Vec<String>)]
    pub selected_mount_points: Vec<MountPointId>,
    pub state: MigrationState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MigrationDBResponse> for MigrationResponse {
    fn from(db: MigrationDBResponse) -> Self {
        Self {
            id: db.id,
            source_workload_id: db.source_workload_id,
            migration_target_id: db.migration_target_id,
            selected_mount_points: db.selected_mount_points,
            state: db.state,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

/// Query parameters for running a migration
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct RunMigrationQuery {
    /// Override the configured run mode
    #[param(inline)]
    pub mode: Option<RunMode>,
}

/// Outcome of `POST /migrations/{id}/run`.
///
/// Synchronous runs report the final state. Asynchronous runs report the state
/// at submission time and the task executing the run.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RunMigrationResponse {
    pub state: MigrationState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>, format = "uuid")]
    pub task_id: Option<TaskId>,
}
