//! API request/response models for migration targets.

use super::credentials::{CredentialsInput, CredentialsResponse};
use super::pagination::Pagination;
use crate::db::models::migration_targets::{CloudType, MigrationTargetDBResponse};
use crate::types::{MigrationTargetId, WorkloadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ListMigrationTargetsQuery {
    #[serde(flatten)]
    #[param(inline)]
    pub pagination: Pagination,

    /// Only targets pointing at this workload
    #[param(value_type = Option<String>, format = "uuid")]
    pub target_workload_id: Option<WorkloadId>,
}

/// Request body for creating a migration target.
///
/// `cloud_type` is taken as free text so that unknown values are reported as
/// an invalid cloud type rather than a malformed body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MigrationTargetCreate {
    /// One of `aws`, `azure`, `vsphere`, `vcloud`
    #[schema(example = "aws")]
    pub cloud_type: String,
    pub credentials: CredentialsInput,
    #[schema(value_type = String, format = "uuid")]
    pub target_workload_id: WorkloadId,
}

/// Request body for updating a migration target.
///
/// `target_workload_id` may be resubmitted unchanged; any other value is rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct MigrationTargetUpdate {
    pub cloud_type: Option<String>,
    pub credentials: Option<CredentialsInput>,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub target_workload_id: Option<WorkloadId>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MigrationTargetResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MigrationTargetId,
    pub cloud_type: CloudType,
    pub credentials: CredentialsResponse,
    #[schema(value_type = String, format = "uuid")]
    pub target_workload_id: WorkloadId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<MigrationTargetDBResponse> for MigrationTargetResponse {
    fn from(db: MigrationTargetDBResponse) -> Self {
        Self {
            id: db.id,
            cloud_type: db.cloud_type,
            credentials: db.credentials.into(),
            target_workload_id: db.target_workload_id,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}
