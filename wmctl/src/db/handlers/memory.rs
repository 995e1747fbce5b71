//! In-process storage backend.
//!
//! All tables live behind one [`RwLock`], so every operation (including
//! cascades and [`Storage::replace_mount_points`]) is atomic with respect to
//! the others. Constraint failures carry the same constraint names as the
//! PostgreSQL schema so callers can treat both backends alike.

use super::{ListFilter, MigrationFilter, MigrationTargetFilter, MountPointFilter, Storage};
use crate::db::errors::{DbError, MOUNT_POINT_NAME_CONSTRAINT, Result, WORKLOAD_IP_CONSTRAINT};
use crate::db::models::{
    credentials::{Credentials, CredentialsCreateDBRequest},
    migration_targets::{MigrationTarget, MigrationTargetCreateDBRequest, MigrationTargetDBResponse, MigrationTargetUpdateDBRequest},
    migrations::{Migration, MigrationCreateDBRequest, MigrationDBResponse, MigrationState, MigrationUpdateDBRequest},
    mount_points::{MountPoint, MountPointCreateDBRequest, MountPointDBResponse, MountPointSpec, MountPointUpdateDBRequest},
    workloads::{Workload, WorkloadCreateDBRequest, WorkloadDBResponse, WorkloadUpdateDBRequest},
};
use crate::types::{CredentialsId, MigrationId, MigrationTargetId, MountPointId, Operation, WorkloadId, abbrev_uuid};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Debug, Default)]
struct Tables {
    credentials: HashMap<CredentialsId, Credentials>,
    workloads: HashMap<WorkloadId, Workload>,
    mount_points: HashMap<MountPointId, MountPoint>,
    targets: HashMap<MigrationTargetId, MigrationTarget>,
    migrations: HashMap<MigrationId, Migration>,
    /// Ordered selection of each migration
    selections: HashMap<MigrationId, Vec<MountPointId>>,
}

/// Sort key shared with the SQL backend: creation time, then ID
fn sorted_by_creation<T, F>(mut rows: Vec<T>, key: F) -> Vec<T>
where
    F: Fn(&T) -> (DateTime<Utc>, Uuid),
{
    rows.sort_by_key(|row| key(row));
    rows
}

fn fk_violation(table: &str, message: impl Into<String>) -> DbError {
    DbError::ForeignKeyViolation {
        constraint: None,
        table: Some(table.to_string()),
        message: message.into(),
    }
}

fn protected_running_migration(operation: Operation, id: MigrationId) -> DbError {
    DbError::ProtectedEntity {
        operation,
        reason: "migration is running".to_string(),
        entity_type: "migration".to_string(),
        entity_id: Some(id.to_string()),
    }
}

impl Tables {
    fn insert_credentials(&mut self, request: &CredentialsCreateDBRequest, now: DateTime<Utc>) -> Credentials {
        let credentials = Credentials {
            id: Uuid::new_v4(),
            username: request.username.clone(),
            password: request.password.clone(),
            domain: request.domain.clone(),
            created_at: now,
            updated_at: now,
        };
        self.credentials.insert(credentials.id, credentials.clone());
        credentials
    }

    fn credentials_of(&self, id: CredentialsId) -> Result<Credentials> {
        self.credentials
            .get(&id)
            .cloned()
            .ok_or_else(|| DbError::Other(anyhow::anyhow!("credentials {id} missing")))
    }

    fn workload_response(&self, workload: &Workload) -> Result<WorkloadDBResponse> {
        Ok(WorkloadDBResponse::new(workload.clone(), self.credentials_of(workload.credentials_id)?))
    }

    fn target_response(&self, target: &MigrationTarget) -> Result<MigrationTargetDBResponse> {
        Ok(MigrationTargetDBResponse::new(
            target.clone(),
            self.credentials_of(target.credentials_id)?,
        ))
    }

    fn migration_response(&self, migration: &Migration) -> MigrationDBResponse {
        let selection = self.selections.get(&migration.id).cloned().unwrap_or_default();
        MigrationDBResponse::new(migration.clone(), selection)
    }

    fn name_taken(&self, workload_id: WorkloadId, name: &str, except: Option<MountPointId>) -> bool {
        self.mount_points
            .values()
            .any(|mp| mp.workload_id == workload_id && mp.name == name && Some(mp.id) != except)
    }

    fn mount_point_name_conflict(workload_id: WorkloadId, name: &str) -> DbError {
        DbError::UniqueViolation {
            constraint: Some(MOUNT_POINT_NAME_CONSTRAINT.to_string()),
            table: Some("mount_points".to_string()),
            message: format!("mount point {name} already exists on workload {workload_id}"),
            conflicting_value: Some(format!("{workload_id}, {name}")),
        }
    }

    fn check_selection_exists(&self, selection: &[MountPointId]) -> Result<()> {
        match selection.iter().find(|id| !self.mount_points.contains_key(id)) {
            Some(id) => Err(fk_violation(
                "migration_mount_points",
                format!("mount point {id} does not exist"),
            )),
            None => Ok(()),
        }
    }

    fn remove_migration(&mut self, id: MigrationId) {
        self.migrations.remove(&id);
        self.selections.remove(&id);
    }

    fn remove_target(&mut self, id: MigrationTargetId) -> bool {
        let Some(target) = self.targets.remove(&id) else {
            return false;
        };
        self.credentials.remove(&target.credentials_id);
        let orphaned: Vec<MigrationId> = self
            .migrations
            .values()
            .filter(|m| m.migration_target_id == id)
            .map(|m| m.id)
            .collect();
        for migration_id in orphaned {
            self.remove_migration(migration_id);
        }
        true
    }

    fn remove_mount_points_of(&mut self, workload_id: WorkloadId) {
        let removed: HashSet<MountPointId> = self
            .mount_points
            .values()
            .filter(|mp| mp.workload_id == workload_id)
            .map(|mp| mp.id)
            .collect();
        self.mount_points.retain(|id, _| !removed.contains(id));
        for selection in self.selections.values_mut() {
            selection.retain(|id| !removed.contains(id));
        }
    }
}

/// Storage backed by in-process hash maps.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    tables: RwLock<Tables>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    #[instrument(skip(self, request), fields(ip = %request.ip), err)]
    async fn create_workload(&self, request: &WorkloadCreateDBRequest) -> Result<WorkloadDBResponse> {
        let mut tables = self.tables.write().await;
        if tables.workloads.values().any(|w| w.ip == request.ip) {
            return Err(DbError::UniqueViolation {
                constraint: Some(WORKLOAD_IP_CONSTRAINT.to_string()),
                table: Some("workloads".to_string()),
                message: format!("workload with ip {} already exists", request.ip),
                conflicting_value: Some(request.ip.clone()),
            });
        }

        let now = Utc::now();
        let credentials = tables.insert_credentials(&request.credentials, now);
        let workload = Workload {
            id: Uuid::new_v4(),
            ip: request.ip.clone(),
            credentials_id: credentials.id,
            created_at: now,
            updated_at: now,
        };
        tables.workloads.insert(workload.id, workload.clone());
        Ok(WorkloadDBResponse::new(workload, credentials))
    }

    async fn get_workload(&self, id: WorkloadId) -> Result<Option<WorkloadDBResponse>> {
        let tables = self.tables.read().await;
        tables.workloads.get(&id).map(|w| tables.workload_response(w)).transpose()
    }

    async fn list_workloads(&self, filter: &ListFilter) -> Result<Vec<WorkloadDBResponse>> {
        let tables = self.tables.read().await;
        let rows = sorted_by_creation(tables.workloads.values().collect(), |w| (w.created_at, w.id));
        filter.page(rows).into_iter().map(|w| tables.workload_response(w)).collect()
    }

    #[instrument(skip(self, request), fields(workload_id = %abbrev_uuid(&id)), err)]
    async fn update_workload(&self, id: WorkloadId, request: &WorkloadUpdateDBRequest) -> Result<WorkloadDBResponse> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let workload = {
            let workload = tables.workloads.get_mut(&id).ok_or(DbError::NotFound)?;
            workload.updated_at = now;
            workload.clone()
        };
        if let Some(update) = request.credentials.as_ref().filter(|u| !u.is_empty()) {
            let credentials = tables
                .credentials
                .get_mut(&workload.credentials_id)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("credentials {} missing", workload.credentials_id)))?;
            update.apply(credentials);
            credentials.updated_at = now;
        }
        tables.workload_response(&workload)
    }

    #[instrument(skip(self), fields(workload_id = %abbrev_uuid(&id)), err)]
    async fn delete_workload(&self, id: WorkloadId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(workload) = tables.workloads.remove(&id) else {
            return Ok(false);
        };
        tables.credentials.remove(&workload.credentials_id);
        tables.remove_mount_points_of(id);

        let targets: Vec<MigrationTargetId> = tables
            .targets
            .values()
            .filter(|t| t.target_workload_id == id)
            .map(|t| t.id)
            .collect();
        for target_id in targets {
            tables.remove_target(target_id);
        }

        let migrations: Vec<MigrationId> = tables
            .migrations
            .values()
            .filter(|m| m.source_workload_id == id)
            .map(|m| m.id)
            .collect();
        for migration_id in migrations {
            tables.remove_migration(migration_id);
        }

        debug!("Deleted workload {} and dependents", abbrev_uuid(&id));
        Ok(true)
    }

    #[instrument(skip(self, request), fields(workload_id = %abbrev_uuid(&request.workload_id), name = %request.name), err)]
    async fn create_mount_point(&self, request: &MountPointCreateDBRequest) -> Result<MountPointDBResponse> {
        let mut tables = self.tables.write().await;
        if !tables.workloads.contains_key(&request.workload_id) {
            return Err(fk_violation(
                "mount_points",
                format!("workload {} does not exist", request.workload_id),
            ));
        }
        if tables.name_taken(request.workload_id, &request.name, None) {
            return Err(Tables::mount_point_name_conflict(request.workload_id, &request.name));
        }

        let now = Utc::now();
        let mount_point = MountPoint {
            id: Uuid::new_v4(),
            workload_id: request.workload_id,
            name: request.name.clone(),
            total_size: request.total_size,
            created_at: now,
            updated_at: now,
        };
        tables.mount_points.insert(mount_point.id, mount_point.clone());
        Ok(mount_point)
    }

    async fn get_mount_point(&self, id: MountPointId) -> Result<Option<MountPointDBResponse>> {
        Ok(self.tables.read().await.mount_points.get(&id).cloned())
    }

    async fn get_mount_points_bulk(&self, ids: &[MountPointId]) -> Result<Vec<MountPointDBResponse>> {
        let tables = self.tables.read().await;
        Ok(ids.iter().filter_map(|id| tables.mount_points.get(id).cloned()).collect())
    }

    async fn list_mount_points(&self, filter: &MountPointFilter) -> Result<Vec<MountPointDBResponse>> {
        let tables = self.tables.read().await;
        let rows = tables
            .mount_points
            .values()
            .filter(|mp| filter.workload_id.is_none_or(|w| mp.workload_id == w))
            .cloned()
            .collect();
        Ok(filter.page.page(sorted_by_creation(rows, |mp| (mp.created_at, mp.id))))
    }

    async fn list_mount_points_for_workloads(
        &self,
        workload_ids: &[WorkloadId],
    ) -> Result<HashMap<WorkloadId, Vec<MountPointDBResponse>>> {
        let tables = self.tables.read().await;
        let wanted: HashSet<&WorkloadId> = workload_ids.iter().collect();
        let rows = tables
            .mount_points
            .values()
            .filter(|mp| wanted.contains(&mp.workload_id))
            .cloned()
            .collect();

        let mut grouped: HashMap<WorkloadId, Vec<MountPointDBResponse>> = HashMap::new();
        for mount_point in sorted_by_creation(rows, |mp| (mp.created_at, mp.id)) {
            grouped.entry(mount_point.workload_id).or_default().push(mount_point);
        }
        Ok(grouped)
    }

    #[instrument(skip(self, request), fields(mount_point_id = %abbrev_uuid(&id)), err)]
    async fn update_mount_point(&self, id: MountPointId, request: &MountPointUpdateDBRequest) -> Result<MountPointDBResponse> {
        let mut tables = self.tables.write().await;
        let workload_id = tables.mount_points.get(&id).ok_or(DbError::NotFound)?.workload_id;
        if let Some(name) = &request.name
            && tables.name_taken(workload_id, name, Some(id))
        {
            return Err(Tables::mount_point_name_conflict(workload_id, name));
        }

        let mount_point = tables.mount_points.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(name) = &request.name {
            mount_point.name = name.clone();
        }
        if let Some(total_size) = request.total_size {
            mount_point.total_size = total_size;
        }
        mount_point.updated_at = Utc::now();
        Ok(mount_point.clone())
    }

    #[instrument(skip(self), fields(mount_point_id = %abbrev_uuid(&id)), err)]
    async fn delete_mount_point(&self, id: MountPointId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        if tables.mount_points.remove(&id).is_none() {
            return Ok(false);
        }
        for selection in tables.selections.values_mut() {
            selection.retain(|selected| *selected != id);
        }
        Ok(true)
    }

    #[instrument(skip(self, mount_points), fields(workload_id = %abbrev_uuid(&workload_id), count = mount_points.len()), err)]
    async fn replace_mount_points(&self, workload_id: WorkloadId, mount_points: &[MountPointSpec]) -> Result<Vec<MountPointDBResponse>> {
        let mut tables = self.tables.write().await;
        if !tables.workloads.contains_key(&workload_id) {
            return Err(DbError::NotFound);
        }

        // Validate the whole batch before touching anything
        let mut names = HashSet::new();
        if let Some(duplicate) = mount_points.iter().find(|spec| !names.insert(spec.name.as_str())) {
            return Err(Tables::mount_point_name_conflict(workload_id, &duplicate.name));
        }

        tables.remove_mount_points_of(workload_id);

        let now = Utc::now();
        let created: Vec<MountPoint> = mount_points
            .iter()
            .map(|spec| MountPoint {
                id: Uuid::new_v4(),
                workload_id,
                name: spec.name.clone(),
                total_size: spec.total_size,
                created_at: now,
                updated_at: now,
            })
            .collect();
        for mount_point in &created {
            tables.mount_points.insert(mount_point.id, mount_point.clone());
        }
        Ok(created)
    }

    #[instrument(skip(self, request), fields(target_workload_id = %abbrev_uuid(&request.target_workload_id)), err)]
    async fn create_migration_target(&self, request: &MigrationTargetCreateDBRequest) -> Result<MigrationTargetDBResponse> {
        let mut tables = self.tables.write().await;
        if !tables.workloads.contains_key(&request.target_workload_id) {
            return Err(fk_violation(
                "migration_targets",
                format!("workload {} does not exist", request.target_workload_id),
            ));
        }

        let now = Utc::now();
        let credentials = tables.insert_credentials(&request.credentials, now);
        let target = MigrationTarget {
            id: Uuid::new_v4(),
            cloud_type: request.cloud_type,
            credentials_id: credentials.id,
            target_workload_id: request.target_workload_id,
            created_at: now,
            updated_at: now,
        };
        tables.targets.insert(target.id, target.clone());
        Ok(MigrationTargetDBResponse::new(target, credentials))
    }

    async fn get_migration_target(&self, id: MigrationTargetId) -> Result<Option<MigrationTargetDBResponse>> {
        let tables = self.tables.read().await;
        tables.targets.get(&id).map(|t| tables.target_response(t)).transpose()
    }

    async fn list_migration_targets(&self, filter: &MigrationTargetFilter) -> Result<Vec<MigrationTargetDBResponse>> {
        let tables = self.tables.read().await;
        let rows = tables
            .targets
            .values()
            .filter(|t| filter.target_workload_id.is_none_or(|w| t.target_workload_id == w))
            .collect();
        filter
            .page
            .page(sorted_by_creation(rows, |t| (t.created_at, t.id)))
            .into_iter()
            .map(|t| tables.target_response(t))
            .collect()
    }

    #[instrument(skip(self, request), fields(target_id = %abbrev_uuid(&id)), err)]
    async fn update_migration_target(
        &self,
        id: MigrationTargetId,
        request: &MigrationTargetUpdateDBRequest,
    ) -> Result<MigrationTargetDBResponse> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let target = {
            let target = tables.targets.get_mut(&id).ok_or(DbError::NotFound)?;
            if let Some(cloud_type) = request.cloud_type {
                target.cloud_type = cloud_type;
            }
            target.updated_at = now;
            target.clone()
        };
        if let Some(update) = request.credentials.as_ref().filter(|u| !u.is_empty()) {
            let credentials = tables
                .credentials
                .get_mut(&target.credentials_id)
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("credentials {} missing", target.credentials_id)))?;
            update.apply(credentials);
            credentials.updated_at = now;
        }
        tables.target_response(&target)
    }

    #[instrument(skip(self), fields(target_id = %abbrev_uuid(&id)), err)]
    async fn delete_migration_target(&self, id: MigrationTargetId) -> Result<bool> {
        Ok(self.tables.write().await.remove_target(id))
    }

    #[instrument(skip(self, request), fields(source_workload_id = %abbrev_uuid(&request.source_workload_id)), err)]
    async fn create_migration(&self, request: &MigrationCreateDBRequest) -> Result<MigrationDBResponse> {
        let mut tables = self.tables.write().await;
        if !tables.workloads.contains_key(&request.source_workload_id) {
            return Err(fk_violation(
                "migrations",
                format!("workload {} does not exist", request.source_workload_id),
            ));
        }
        if !tables.targets.contains_key(&request.migration_target_id) {
            return Err(fk_violation(
                "migrations",
                format!("migration target {} does not exist", request.migration_target_id),
            ));
        }
        tables.check_selection_exists(&request.selected_mount_points)?;

        let now = Utc::now();
        let migration = Migration {
            id: Uuid::new_v4(),
            source_workload_id: request.source_workload_id,
            migration_target_id: request.migration_target_id,
            state: MigrationState::NotStarted,
            created_at: now,
            updated_at: now,
        };
        tables.migrations.insert(migration.id, migration.clone());
        tables.selections.insert(migration.id, request.selected_mount_points.clone());
        Ok(MigrationDBResponse::new(migration, request.selected_mount_points.clone()))
    }

    async fn get_migration(&self, id: MigrationId) -> Result<Option<MigrationDBResponse>> {
        let tables = self.tables.read().await;
        Ok(tables.migrations.get(&id).map(|m| tables.migration_response(m)))
    }

    async fn list_migrations(&self, filter: &MigrationFilter) -> Result<Vec<MigrationDBResponse>> {
        let tables = self.tables.read().await;
        let rows = tables
            .migrations
            .values()
            .filter(|m| filter.state.is_none_or(|s| m.state == s))
            .filter(|m| filter.source_workload_id.is_none_or(|w| m.source_workload_id == w))
            .collect();
        Ok(filter
            .page
            .page(sorted_by_creation(rows, |m| (m.created_at, m.id)))
            .into_iter()
            .map(|m| tables.migration_response(m))
            .collect())
    }

    #[instrument(skip(self, request), fields(migration_id = %abbrev_uuid(&id)), err)]
    async fn update_migration(&self, id: MigrationId, request: &MigrationUpdateDBRequest) -> Result<MigrationDBResponse> {
        let mut tables = self.tables.write().await;
        let state = tables.migrations.get(&id).ok_or(DbError::NotFound)?.state;
        if state == MigrationState::Running {
            return Err(protected_running_migration(Operation::Update, id));
        }
        if let Some(target_id) = request.migration_target_id
            && !tables.targets.contains_key(&target_id)
        {
            return Err(fk_violation("migrations", format!("migration target {target_id} does not exist")));
        }
        if let Some(selection) = &request.selected_mount_points {
            tables.check_selection_exists(selection)?;
            tables.selections.insert(id, selection.clone());
        }

        let migration = tables.migrations.get_mut(&id).ok_or(DbError::NotFound)?;
        if let Some(target_id) = request.migration_target_id {
            migration.migration_target_id = target_id;
        }
        migration.updated_at = Utc::now();
        let migration = migration.clone();
        Ok(tables.migration_response(&migration))
    }

    #[instrument(skip(self), fields(migration_id = %abbrev_uuid(&id)), err)]
    async fn delete_migration(&self, id: MigrationId) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.migrations.get(&id) {
            None => Ok(false),
            Some(m) if m.state == MigrationState::Running => Err(protected_running_migration(Operation::Delete, id)),
            Some(_) => {
                tables.remove_migration(id);
                Ok(true)
            }
        }
    }

    async fn try_start_migration(&self, id: MigrationId) -> Result<Option<MigrationDBResponse>> {
        let mut tables = self.tables.write().await;
        let migration = tables.migrations.get_mut(&id).ok_or(DbError::NotFound)?;
        if migration.state == MigrationState::Running {
            return Ok(None);
        }
        migration.state = MigrationState::Running;
        migration.updated_at = Utc::now();
        let migration = migration.clone();
        Ok(Some(tables.migration_response(&migration)))
    }

    async fn set_migration_state(&self, id: MigrationId, state: MigrationState) -> Result<MigrationDBResponse> {
        let mut tables = self.tables.write().await;
        let migration = tables.migrations.get_mut(&id).ok_or(DbError::NotFound)?;
        migration.state = state;
        migration.updated_at = Utc::now();
        let migration = migration.clone();
        Ok(tables.migration_response(&migration))
    }

    async fn fail_interrupted_migrations(&self) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let now = Utc::now();
        let mut changed = 0;
        for migration in tables.migrations.values_mut().filter(|m| m.state == MigrationState::Running) {
            migration.state = MigrationState::Error;
            migration.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }
}
