//! Database models for migration targets.

use super::credentials::{Credentials, CredentialsCreateDBRequest, CredentialsUpdateDBRequest};
use crate::types::{CredentialsId, MigrationTargetId, WorkloadId};
use crate::validation::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

/// Cloud or virtualisation platform hosting a migration target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CloudType {
    Aws,
    Azure,
    Vsphere,
    Vcloud,
}

impl CloudType {
    pub const ALL: [CloudType; 4] = [CloudType::Aws, CloudType::Azure, CloudType::Vsphere, CloudType::Vcloud];

    pub fn as_str(&self) -> &'static str {
        match self {
            CloudType::Aws => "aws",
            CloudType::Azure => "azure",
            CloudType::Vsphere => "vsphere",
            CloudType::Vcloud => "vcloud",
        }
    }
}

impl fmt::Display for CloudType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CloudType::ALL
            .into_iter()
            .find(|cloud_type| cloud_type.as_str() == s)
            .ok_or_else(|| ValidationError::InvalidCloudType { value: s.to_string() })
    }
}

/// Database representation of a migration target row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MigrationTarget {
    pub id: MigrationTargetId,
    pub cloud_type: CloudType,
    pub credentials_id: CredentialsId,
    pub target_workload_id: WorkloadId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a migration target together with its cloud credentials
#[derive(Debug, Clone)]
pub struct MigrationTargetCreateDBRequest {
    pub cloud_type: CloudType,
    pub credentials: CredentialsCreateDBRequest,
    pub target_workload_id: WorkloadId,
}

/// Request to update a migration target. The target workload is fixed at creation.
#[derive(Debug, Clone, Default)]
pub struct MigrationTargetUpdateDBRequest {
    pub cloud_type: Option<CloudType>,
    pub credentials: Option<CredentialsUpdateDBRequest>,
}

/// A migration target joined with its credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationTargetDBResponse {
    pub id: MigrationTargetId,
    pub cloud_type: CloudType,
    pub credentials: Credentials,
    pub target_workload_id: WorkloadId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MigrationTargetDBResponse {
    pub fn new(target: MigrationTarget, credentials: Credentials) -> Self {
        Self {
            id: target.id,
            cloud_type: target.cloud_type,
            credentials,
            target_workload_id: target.target_workload_id,
            created_at: target.created_at,
            updated_at: target.updated_at,
        }
    }
}
