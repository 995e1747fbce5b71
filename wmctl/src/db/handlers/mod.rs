//! Storage implementations for data access.
//!
//! The [`Storage`] trait is the only way the rest of the crate touches persisted
//! state. It returns plain records from [`crate::db::models`]; nothing saves
//! itself.
//!
//! # Backends
//!
//! - [`PostgresStorage`]: SQLx over a PostgreSQL pool; multi-row changes run in
//!   one transaction
//! - [`InMemoryStorage`]: a lock-protected set of tables with the same
//!   constraint behaviour, used for development and tests
//!
//! # Constraint behaviour
//!
//! Both backends report violations through [`DbError`](crate::db::errors::DbError):
//!
//! - duplicate workload IP -> `UniqueViolation` on
//!   [`WORKLOAD_IP_CONSTRAINT`](crate::db::errors::WORKLOAD_IP_CONSTRAINT)
//! - duplicate mount point name on one workload -> `UniqueViolation` on
//!   [`MOUNT_POINT_NAME_CONSTRAINT`](crate::db::errors::MOUNT_POINT_NAME_CONSTRAINT)
//! - reference to a missing workload/target/mount point -> `ForeignKeyViolation`
//! - changing or deleting a running migration -> `ProtectedEntity`
//!
//! # Example
//!
//! ```ignore
//! use wmctl::db::handlers::{InMemoryStorage, Storage};
//!
//! let storage = InMemoryStorage::new();
//! let workload = storage.create_workload(&request).await?;
//! let mount_points = storage.list_mount_points(&MountPointFilter::for_workload(workload.id)).await?;
//! ```

pub mod memory;
pub mod postgres;

pub use memory::InMemoryStorage;
pub use postgres::PostgresStorage;

use crate::db::errors::Result;
use crate::db::models::{
    migration_targets::{MigrationTargetCreateDBRequest, MigrationTargetDBResponse, MigrationTargetUpdateDBRequest},
    migrations::{MigrationCreateDBRequest, MigrationDBResponse, MigrationState, MigrationUpdateDBRequest},
    mount_points::{MountPointCreateDBRequest, MountPointDBResponse, MountPointSpec, MountPointUpdateDBRequest},
    workloads::{WorkloadCreateDBRequest, WorkloadDBResponse, WorkloadUpdateDBRequest},
};
use crate::types::{MigrationId, MigrationTargetId, MountPointId, WorkloadId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Offset pagination shared by all list operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListFilter {
    pub skip: i64,
    pub limit: i64,
}

impl ListFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self { skip, limit }
    }

    /// Apply skip/limit to an already ordered in-memory result
    pub(crate) fn page<T>(&self, items: Vec<T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.skip.max(0) as usize)
            .take(self.limit.max(0) as usize)
            .collect()
    }
}

impl Default for ListFilter {
    fn default() -> Self {
        Self { skip: 0, limit: i64::MAX }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MountPointFilter {
    pub workload_id: Option<WorkloadId>,
    pub page: ListFilter,
}

impl MountPointFilter {
    pub fn for_workload(workload_id: WorkloadId) -> Self {
        Self {
            workload_id: Some(workload_id),
            page: ListFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MigrationTargetFilter {
    pub target_workload_id: Option<WorkloadId>,
    pub page: ListFilter,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationFilter {
    pub state: Option<MigrationState>,
    pub source_workload_id: Option<WorkloadId>,
    pub page: ListFilter,
}

/// Data access for every entity of the service.
///
/// Lists are ordered by creation time (ties broken by ID). Lookups by ID return
/// `Ok(None)` when nothing matches; updates return `DbError::NotFound`.
#[async_trait]
pub trait Storage: Send + Sync {
    // Workloads

    /// Create a workload and its credentials atomically
    async fn create_workload(&self, request: &WorkloadCreateDBRequest) -> Result<WorkloadDBResponse>;

    async fn get_workload(&self, id: WorkloadId) -> Result<Option<WorkloadDBResponse>>;

    async fn list_workloads(&self, filter: &ListFilter) -> Result<Vec<WorkloadDBResponse>>;

    /// Update a workload's credentials; the IP is never written after creation
    async fn update_workload(&self, id: WorkloadId, request: &WorkloadUpdateDBRequest) -> Result<WorkloadDBResponse>;

    /// Delete a workload, its credentials and mount points, every target pointing
    /// at it and every migration that references it
    async fn delete_workload(&self, id: WorkloadId) -> Result<bool>;

    // Mount points

    async fn create_mount_point(&self, request: &MountPointCreateDBRequest) -> Result<MountPointDBResponse>;

    async fn get_mount_point(&self, id: MountPointId) -> Result<Option<MountPointDBResponse>>;

    /// Fetch mount points by ID, in the order requested; unknown IDs are skipped
    async fn get_mount_points_bulk(&self, ids: &[MountPointId]) -> Result<Vec<MountPointDBResponse>>;

    async fn list_mount_points(&self, filter: &MountPointFilter) -> Result<Vec<MountPointDBResponse>>;

    /// Mount points of several workloads, keyed by workload ID
    async fn list_mount_points_for_workloads(
        &self,
        workload_ids: &[WorkloadId],
    ) -> Result<HashMap<WorkloadId, Vec<MountPointDBResponse>>>;

    async fn update_mount_point(&self, id: MountPointId, request: &MountPointUpdateDBRequest) -> Result<MountPointDBResponse>;

    async fn delete_mount_point(&self, id: MountPointId) -> Result<bool>;

    /// Atomically delete every mount point of a workload and create the given
    /// ones in their place
    async fn replace_mount_points(&self, workload_id: WorkloadId, mount_points: &[MountPointSpec]) -> Result<Vec<MountPointDBResponse>>;

    // Migration targets

    /// Create a target and its credentials atomically
    async fn create_migration_target(&self, request: &MigrationTargetCreateDBRequest) -> Result<MigrationTargetDBResponse>;

    async fn get_migration_target(&self, id: MigrationTargetId) -> Result<Option<MigrationTargetDBResponse>>;

    async fn list_migration_targets(&self, filter: &MigrationTargetFilter) -> Result<Vec<MigrationTargetDBResponse>>;

    async fn update_migration_target(
        &self,
        id: MigrationTargetId,
        request: &MigrationTargetUpdateDBRequest,
    ) -> Result<MigrationTargetDBResponse>;

    /// Delete a target, its credentials and its migrations
    async fn delete_migration_target(&self, id: MigrationTargetId) -> Result<bool>;

    // Migrations

    async fn create_migration(&self, request: &MigrationCreateDBRequest) -> Result<MigrationDBResponse>;

    async fn get_migration(&self, id: MigrationId) -> Result<Option<MigrationDBResponse>>;

    async fn list_migrations(&self, filter: &MigrationFilter) -> Result<Vec<MigrationDBResponse>>;

    /// Change a migration's target or selection; refused while it is running
    async fn update_migration(&self, id: MigrationId, request: &MigrationUpdateDBRequest) -> Result<MigrationDBResponse>;

    /// Delete a migration; refused while it is running
    async fn delete_migration(&self, id: MigrationId) -> Result<bool>;

    /// Move a migration to `running` unless it already is.
    ///
    /// Returns `Ok(None)` when another execution holds it in `running`.
    async fn try_start_migration(&self, id: MigrationId) -> Result<Option<MigrationDBResponse>>;

    /// Record a migration's state unconditionally
    async fn set_migration_state(&self, id: MigrationId, state: MigrationState) -> Result<MigrationDBResponse>;

    /// Move every `running` migration to `error`. Used at startup to clear runs
    /// interrupted by a crash; returns how many were changed.
    async fn fail_interrupted_migrations(&self) -> Result<u64>;
}
