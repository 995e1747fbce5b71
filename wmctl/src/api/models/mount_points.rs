//! API request/response models for mount points.

use super::pagination::Pagination;
use crate::db::models::mount_points::MountPointDBResponse;
use crate::types::{MountPointId, WorkloadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListMountPointsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only mount points of this workload
    #[param(value_type = Option<String>, format = "uuid")]
    pub workload_id: Option<WorkloadId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MountPointCreate {
    #[schema(value_type = String, format = "uuid")]
    pub workload_id: WorkloadId,
    /// Volume name, unique within the workload
    #[schema(example = "D:\\")]
    pub name: String,
    /// Size in GB
    #[schema(example = 75)]
    pub total_size: i64,
}

/// Rename or resize a mount point. The owning workload cannot change.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MountPointUpdate {
    pub name: Option<String>,
    pub total_size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MountPointResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MountPointId,
    #[schema(value_type = String, format = "uuid")]
    pub workload_id: WorkloadId,
    pub name: String,
    pub total_size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MountPointDBResponse> for MountPointResponse {
    fn from(db: MountPointDBResponse) -> Self {
        Self {
            id: db.id,
            workload_id: db.workload_id,
            name: db.name,
            total_size: db.total_size,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}
