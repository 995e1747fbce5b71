//! API request/response models for workloads.

use super::credentials::{CredentialsInput, CredentialsResponse};
use super::mount_points::MountPointResponse;
use super::pagination::Pagination;
use crate::db::models::workloads::WorkloadDBResponse;
use crate::types::WorkloadId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Query parameters for listing workloads
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListWorkloadsQuery {
    /// Pagination parameters
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Include related data (comma-separated: "mount_points")
    pub include: Option<String>,
}

impl ListWorkloadsQuery {
    pub fn includes(&self, relation: &str) -> bool {
        self.include
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .any(|included| included == relation)
    }
}

/// Request body for registering a workload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkloadCreate {
    /// IPv4 or IPv6 address; unique across workloads and fixed once created
    #[schema(example = "10.0.0.1")]
    pub ip: String,
    pub credentials: CredentialsInput,
}

/// Request body for updating a workload.
///
/// `ip` may be resubmitted unchanged; any other value is rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct WorkloadUpdate {
    pub ip: Option<String>,
    pub credentials: Option<CredentialsInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WorkloadResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: WorkloadId,
    pub ip: String,
    pub credentials: CredentialsResponse,
    /// Only on single reads, or lists with `include=mount_points`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mount_points: Option<Vec<MountPointResponse>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkloadDBResponse> for WorkloadResponse {
    fn from(db: WorkloadDBResponse) -> Self {
        Self {
            id: db.id,
            ip: db.ip,
            credentials: db.credentials.into(),
            mount_points: None,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

impl WorkloadResponse {
    pub fn with_mount_points(mut self, mount_points: Vec<MountPointResponse>) -> Self {
        self.mount_points = Some(mount_points);
        self
    }
}
