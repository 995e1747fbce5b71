//! Shared fixtures for unit and handler tests.

use crate::config::{Config, DatabaseConfig, MigrationsConfig};
use crate::db::errors::{DbError, Result};
use crate::db::handlers::{InMemoryStorage, ListFilter, MigrationFilter, MigrationTargetFilter, MountPointFilter, Storage};
use crate::db::models::{
    credentials::CredentialsCreateDBRequest,
    migration_targets::{CloudType, MigrationTargetCreateDBRequest, MigrationTargetDBResponse, MigrationTargetUpdateDBRequest},
    migrations::{MigrationCreateDBRequest, MigrationDBResponse, MigrationState, MigrationUpdateDBRequest},
    mount_points::{MountPointCreateDBRequest, MountPointDBResponse, MountPointSpec, MountPointUpdateDBRequest},
    workloads::{WorkloadCreateDBRequest, WorkloadDBResponse, WorkloadUpdateDBRequest},
};
use crate::migration::MigrationRunner;
use crate::tasks::TokioJobQueue;
use crate::types::{MigrationId, MigrationTargetId, MountPointId, WorkloadId};
use crate::{AppState, build_router};
use async_trait::async_trait;
use axum_test::TestServer;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// In-memory configuration with no simulated copy delay
pub fn create_test_config() -> Config {
    Config {
        database: DatabaseConfig::Memory,
        migrations: MigrationsConfig {
            simulated_delay: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn create_test_app(config: Config) -> (TestServer, AppState) {
    create_test_app_with_storage(config, Arc::new(InMemoryStorage::new())).await
}

pub async fn create_test_app_with_storage(config: Config, storage: Arc<dyn Storage>) -> (TestServer, AppState) {
    let queue = TokioJobQueue::new(config.tasks.retry.build())
        .with_max_concurrent(config.tasks.max_concurrent)
        .with_retention(config.tasks.retention);

    let state = AppState::builder()
        .storage(storage.clone())
        .runner(MigrationRunner::new(storage))
        .queue(Arc::new(queue))
        .config(config)
        .build();

    let router = build_router(&state).expect("Failed to build router");
    let server = TestServer::new(router.into_make_service()).expect("Failed to create test server");
    (server, state)
}

pub fn test_credentials(username: &str) -> CredentialsCreateDBRequest {
    CredentialsCreateDBRequest {
        username: username.to_string(),
        password: format!("{username}-password"),
        domain: "CORP".to_string(),
    }
}

pub async fn create_workload(storage: &dyn Storage, ip: &str) -> WorkloadDBResponse {
    storage
        .create_workload(&WorkloadCreateDBRequest {
            ip: ip.to_string(),
            credentials: test_credentials("administrator"),
        })
        .await
        .expect("Failed to create test workload")
}

pub async fn create_mount_point(storage: &dyn Storage, workload_id: WorkloadId, name: &str, total_size: i64) -> MountPointDBResponse {
    storage
        .create_mount_point(&MountPointCreateDBRequest {
            workload_id,
            name: name.to_string(),
            total_size,
        })
        .await
        .expect("Failed to create test mount point")
}

pub async fn create_target(storage: &dyn Storage, cloud_type: CloudType, target_workload_id: WorkloadId) -> MigrationTargetDBResponse {
    storage
        .create_migration_target(&MigrationTargetCreateDBRequest {
            cloud_type,
            credentials: test_credentials("cloud-admin"),
            target_workload_id,
        })
        .await
        .expect("Failed to create test migration target")
}

/// A source with `C:\` (50) and `D:\` (75), an empty destination, and an AWS
/// target pointing at the destination.
pub struct Scenario {
    pub source: WorkloadDBResponse,
    pub destination: WorkloadDBResponse,
    pub c_drive: MountPointDBResponse,
    pub d_drive: MountPointDBResponse,
    pub target: MigrationTargetDBResponse,
}

pub async fn seed_scenario(storage: &dyn Storage) -> Scenario {
    let source = create_workload(storage, "10.0.0.1").await;
    let destination = create_workload(storage, "10.0.0.2").await;
    let c_drive = create_mount_point(storage, source.id, "C:\\", 50).await;
    let d_drive = create_mount_point(storage, source.id, "D:\\", 75).await;
    let target = create_target(storage, CloudType::Aws, destination.id).await;
    Scenario {
        source,
        destination,
        c_drive,
        d_drive,
        target,
    }
}

pub async fn create_migration(storage: &dyn Storage, scenario: &Scenario, selected_mount_points: Vec<MountPointId>) -> MigrationDBResponse {
    storage
        .create_migration(&MigrationCreateDBRequest {
            source_workload_id: scenario.source.id,
            migration_target_id: scenario.target.id,
            selected_mount_points,
        })
        .await
        .expect("Failed to create test migration")
}

/// In-memory storage whose next `n` mount point replacements fail, for
/// exercising copy failures and retries.
pub struct FaultyStorage {
    inner: InMemoryStorage,
    failures_left: AtomicUsize,
}

impl FaultyStorage {
    pub fn failing_replacements(n: usize) -> Self {
        Self {
            inner: InMemoryStorage::new(),
            failures_left: AtomicUsize::new(n),
        }
    }
}

#[async_trait]
impl Storage for FaultyStorage {
    async fn create_workload(&self, request: &WorkloadCreateDBRequest) -> Result<WorkloadDBResponse> {
        self.inner.create_workload(request).await
    }

    async fn get_workload(&self, id: WorkloadId) -> Result<Option<WorkloadDBResponse>> {
        self.inner.get_workload(id).await
    }

    async fn list_workloads(&self, filter: &ListFilter) -> Result<Vec<WorkloadDBResponse>> {
        self.inner.list_workloads(filter).await
    }

    async fn update_workload(&self, id: WorkloadId, request: &WorkloadUpdateDBRequest) -> Result<WorkloadDBResponse> {
        self.inner.update_workload(id, request).await
    }

    async fn delete_workload(&self, id: WorkloadId) -> Result<bool> {
        self.inner.delete_workload(id).await
    }

    async fn create_mount_point(&self, request: &MountPointCreateDBRequest) -> Result<MountPointDBResponse> {
        self.inner.create_mount_point(request).await
    }

    async fn get_mount_point(&self, id: MountPointId) -> Result<Option<MountPointDBResponse>> {
        self.inner.get_mount_point(id).await
    }

    async fn get_mount_points_bulk(&self, ids: &[MountPointId]) -> Result<Vec<MountPointDBResponse>> {
        self.inner.get_mount_points_bulk(ids).await
    }

    async fn list_mount_points(&self, filter: &MountPointFilter) -> Result<Vec<MountPointDBResponse>> {
        self.inner.list_mount_points(filter).await
    }

    async fn list_mount_points_for_workloads(
        &self,
        workload_ids: &[WorkloadId],
    ) -> Result<HashMap<WorkloadId, Vec<MountPointDBResponse>>> {
        self.inner.list_mount_points_for_workloads(workload_ids).await
    }

    async fn update_mount_point(&self, id: MountPointId, request: &MountPointUpdateDBRequest) -> Result<MountPointDBResponse> {
        self.inner.update_mount_point(id, request).await
    }

    async fn delete_mount_point(&self, id: MountPointId) -> Result<bool> {
        self.inner.delete_mount_point(id).await
    }

    async fn replace_mount_points(&self, workload_id: WorkloadId, mount_points: &[MountPointSpec]) -> Result<Vec<MountPointDBResponse>> {
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(DbError::Other(anyhow::anyhow!("simulated copy failure")));
        }
        self.inner.replace_mount_points(workload_id, mount_points).await
    }

    async fn create_migration_target(&self, request: &MigrationTargetCreateDBRequest) -> Result<MigrationTargetDBResponse> {
        self.inner.create_migration_target(request).await
    }

    async fn get_migration_target(&self, id: MigrationTargetId) -> Result<Option<MigrationTargetDBResponse>> {
        self.inner.get_migration_target(id).await
    }

    async fn list_migration_targets(&self, filter: &MigrationTargetFilter) -> Result<Vec<MigrationTargetDBResponse>> {
        self.inner.list_migration_targets(filter).await
    }

    async fn update_migration_target(
        &self,
        id: MigrationTargetId,
        request: &MigrationTargetUpdateDBRequest,
    ) -> Result<MigrationTargetDBResponse> {
        self.inner.update_migration_target(id, request).await
    }

    async fn delete_migration_target(&self, id: MigrationTargetId) -> Result<bool> {
        self.inner.delete_migration_target(id).await
    }

    async fn create_migration(&self, request: &MigrationCreateDBRequest) -> Result<MigrationDBResponse> {
        self.inner.create_migration(request).await
    }

    async fn get_migration(&self, id: MigrationId) -> Result<Option<MigrationDBResponse>> {
        self.inner.get_migration(id).await
    }

    async fn list_migrations(&self, filter: &MigrationFilter) -> Result<Vec<MigrationDBResponse>> {
        self.inner.list_migrations(filter).await
    }

    async fn update_migration(&self, id: MigrationId, request: &MigrationUpdateDBRequest) -> Result<MigrationDBResponse> {
        self.inner.update_migration(id, request).await
    }

    async fn delete_migration(&self, id: MigrationId) -> Result<bool> {
        self.inner.delete_migration(id).await
    }

    async fn try_start_migration(&self, id: MigrationId) -> Result<Option<MigrationDBResponse>> {
        self.inner.try_start_migration(id).await
    }

    async fn set_migration_state(&self, id: MigrationId, state: MigrationState) -> Result<MigrationDBResponse> {
        self.inner.set_migration_state(id, state).await
    }

    async fn fail_interrupted_migrations(&self) -> Result<u64> {
        self.inner.fail_interrupted_migrations().await
    }
}
