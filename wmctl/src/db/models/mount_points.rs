//! Database models for mount points.

use crate::types::{MountPointId, WorkloadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database representation of a mount point
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MountPoint {
    pub id: MountPointId,
    pub workload_id: WorkloadId,
    pub name: String,
    pub total_size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a mount point on a workload
#[derive(Debug, Clone)]
pub struct MountPointCreateDBRequest {
    pub workload_id: WorkloadId,
    pub name: String,
    pub total_size: i64,
}

/// Request to update a mount point; the owning workload cannot change
#[derive(Debug, Clone, Default)]
pub struct MountPointUpdateDBRequest {
    pub name: Option<String>,
    pub total_size: Option<i64>,
}

/// The owner-independent part of a mount point, used when copying volumes
/// from one workload to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPointSpec {
    pub name: String,
    pub total_size: i64,
}

impl From<&MountPoint> for MountPointSpec {
    fn from(mount_point: &MountPoint) -> Self {
        Self {
            name: mount_point.name.clone(),
            total_size: mount_point.total_size,
        }
    }
}

pub type MountPointDBResponse = MountPoint;
