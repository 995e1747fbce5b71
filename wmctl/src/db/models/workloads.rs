//! Database models for workloads.

use super::credentials::{Credentials, CredentialsCreateDBRequest, CredentialsUpdateDBRequest};
use crate::types::{CredentialsId, WorkloadId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database representation of a workload row
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Workload {
    pub id: WorkloadId,
    pub ip: String,
    pub credentials_id: CredentialsId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a workload together with its credentials
#[derive(Debug, Clone)]
pub struct WorkloadCreateDBRequest {
    /// Canonical textual form of the address
    pub ip: String,
    pub credentials: CredentialsCreateDBRequest,
}

/// Request to update a workload.
///
/// The IP is deliberately absent: it is fixed once the workload exists.
#[derive(Debug, Clone, Default)]
pub struct WorkloadUpdateDBRequest {
    pub credentials: Option<CredentialsUpdateDBRequest>,
}

/// A workload joined with its credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadDBResponse {
    pub id: WorkloadId,
    pub ip: String,
    pub credentials: Credentials,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkloadDBResponse {
    pub fn new(workload: Workload, credentials: Credentials) -> Self {
        Self {
            id: workload.id,
            ip: workload.ip,
            credentials,
            created_at: workload.created_at,
            updated_at: workload.updated_at,
        }
    }
}
