//! PostgreSQL storage backend.
//!
//! Queries are built at runtime with `sqlx::query_as`, so the crate builds
//! without a live database. Operations touching more than one row run inside a
//! transaction; the migration state compare-and-set is a single conditional
//! `UPDATE`.

use super::{ListFilter, MigrationFilter, MigrationTargetFilter, MountPointFilter, Storage};
use crate::db::errors::{DbError, Result};
use crate::db::models::{
    credentials::{Credentials, CredentialsCreateDBRequest, CredentialsUpdateDBRequest},
    migration_targets::{MigrationTarget, MigrationTargetCreateDBRequest, MigrationTargetDBResponse, MigrationTargetUpdateDBRequest},
    migrations::{Migration, MigrationCreateDBRequest, MigrationDBResponse, MigrationState, MigrationUpdateDBRequest},
    mount_points::{MountPoint, MountPointCreateDBRequest, MountPointDBResponse, MountPointSpec, MountPointUpdateDBRequest},
    workloads::{Workload, WorkloadCreateDBRequest, WorkloadDBResponse, WorkloadUpdateDBRequest},
};
use crate::types::{CredentialsId, MigrationId, MigrationTargetId, MountPointId, Operation, WorkloadId, abbrev_uuid};
use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Storage backed by a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn insert_credentials(conn: &mut PgConnection, request: &CredentialsCreateDBRequest) -> Result<Credentials> {
    let credentials = sqlx::query_as::<_, Credentials>(
        "INSERT INTO credentials (username, password, domain) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(&request.username)
    .bind(&request.password)
    .bind(&request.domain)
    .fetch_one(conn)
    .await?;
    Ok(credentials)
}

async fn update_credentials(conn: &mut PgConnection, id: CredentialsId, request: &CredentialsUpdateDBRequest) -> Result<Credentials> {
    let credentials = sqlx::query_as::<_, Credentials>(
        r#"
        UPDATE credentials SET
            username = COALESCE($2, username),
            password = COALESCE($3, password),
            domain = COALESCE($4, domain),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(request.username.as_deref())
    .bind(request.password.as_deref())
    .bind(request.domain.as_deref())
    .fetch_one(conn)
    .await?;
    Ok(credentials)
}

async fn fetch_credentials(conn: &mut PgConnection, id: CredentialsId) -> Result<Credentials> {
    let credentials = sqlx::query_as::<_, Credentials>("SELECT * FROM credentials WHERE id = $1")
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(credentials)
}

async fn fetch_credentials_bulk(conn: &mut PgConnection, ids: &[CredentialsId]) -> Result<HashMap<CredentialsId, Credentials>> {
    let rows = sqlx::query_as::<_, Credentials>("SELECT * FROM credentials WHERE id = ANY($1)")
        .bind(ids)
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(|c| (c.id, c)).collect())
}

fn take_credentials(credentials: &mut HashMap<CredentialsId, Credentials>, id: CredentialsId) -> Result<Credentials> {
    credentials
        .remove(&id)
        .ok_or_else(|| DbError::Other(anyhow::anyhow!("credentials {id} missing")))
}

async fn fetch_selections(conn: &mut PgConnection, migration_ids: &[MigrationId]) -> Result<HashMap<MigrationId, Vec<MountPointId>>> {
    let rows = sqlx::query_as::<_, (MigrationId, MountPointId)>(
        r#"
        SELECT migration_id, mount_point_id
        FROM migration_mount_points
        WHERE migration_id = ANY($1)
        ORDER BY migration_id, position
        "#,
    )
    .bind(migration_ids)
    .fetch_all(conn)
    .await?;

    let mut selections: HashMap<MigrationId, Vec<MountPointId>> = HashMap::new();
    for (migration_id, mount_point_id) in rows {
        selections.entry(migration_id).or_default().push(mount_point_id);
    }
    Ok(selections)
}

async fn write_selection(conn: &mut PgConnection, migration_id: MigrationId, selection: &[MountPointId]) -> Result<()> {
    sqlx::query("DELETE FROM migration_mount_points WHERE migration_id = $1")
        .bind(migration_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO migration_mount_points (migration_id, mount_point_id, position)
        SELECT $1, selected.id, (selected.ord - 1)::int
        FROM UNNEST($2::uuid[]) WITH ORDINALITY AS selected(id, ord)
        "#,
    )
    .bind(migration_id)
    .bind(selection)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn migration_response(conn: &mut PgConnection, migration: Migration) -> Result<MigrationDBResponse> {
    let mut selections = fetch_selections(conn, &[migration.id]).await?;
    let selection = selections.remove(&migration.id).unwrap_or_default();
    Ok(MigrationDBResponse::new(migration, selection))
}

async fn migration_exists(conn: &mut PgConnection, id: MigrationId) -> Result<bool> {
    let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM migrations WHERE id = $1)")
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(exists)
}

fn protected_running_migration(operation: Operation, id: MigrationId) -> DbError {
    DbError::ProtectedEntity {
        operation,
        reason: "migration is running".to_string(),
        entity_type: "migration".to_string(),
        entity_id: Some(id.to_string()),
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    #[instrument(skip(self, request), fields(ip = %request.ip), err)]
    async fn create_workload(&self, request: &WorkloadCreateDBRequest) -> Result<WorkloadDBResponse> {
        let mut tx = self.pool.begin().await?;
        let credentials = insert_credentials(&mut tx, &request.credentials).await?;
        let workload = sqlx::query_as::<_, Workload>("INSERT INTO workloads (ip, credentials_id) VALUES ($1, $2) RETURNING *")
            .bind(&request.ip)
            .bind(credentials.id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(WorkloadDBResponse::new(workload, credentials))
    }

    async fn get_workload(&self, id: WorkloadId) -> Result<Option<WorkloadDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        let Some(workload) = sqlx::query_as::<_, Workload>("SELECT * FROM workloads WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };
        let credentials = fetch_credentials(&mut conn, workload.credentials_id).await?;
        Ok(Some(WorkloadDBResponse::new(workload, credentials)))
    }

    async fn list_workloads(&self, filter: &ListFilter) -> Result<Vec<WorkloadDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        let workloads = sqlx::query_as::<_, Workload>("SELECT * FROM workloads ORDER BY created_at, id OFFSET $1 LIMIT $2")
            .bind(filter.skip)
            .bind(filter.limit)
            .fetch_all(&mut *conn)
            .await?;

        let ids: Vec<CredentialsId> = workloads.iter().map(|w| w.credentials_id).collect();
        let mut credentials = fetch_credentials_bulk(&mut conn, &ids).await?;
        workloads
            .into_iter()
            .map(|w| {
                let creds = take_credentials(&mut credentials, w.credentials_id)?;
                Ok(WorkloadDBResponse::new(w, creds))
            })
            .collect()
    }

    #[instrument(skip(self, request), fields(workload_id = %abbrev_uuid(&id)), err)]
    async fn update_workload(&self, id: WorkloadId, request: &WorkloadUpdateDBRequest) -> Result<WorkloadDBResponse> {
        let mut tx = self.pool.begin().await?;
        let workload = sqlx::query_as::<_, Workload>("UPDATE workloads SET updated_at = NOW() WHERE id = $1 RETURNING *")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;

        let credentials = match request.credentials.as_ref().filter(|u| !u.is_empty()) {
            Some(update) => update_credentials(&mut tx, workload.credentials_id, update).await?,
            None => fetch_credentials(&mut tx, workload.credentials_id).await?,
        };
        tx.commit().await?;
        Ok(WorkloadDBResponse::new(workload, credentials))
    }

    #[instrument(skip(self), fields(workload_id = %abbrev_uuid(&id)), err)]
    async fn delete_workload(&self, id: WorkloadId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let Some(credentials_id) = sqlx::query_scalar::<_, CredentialsId>("SELECT credentials_id FROM workloads WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(false);
        };

        // Dropping owned credentials cascades to the targets (and their migrations)
        // and then to the workload itself, its mount points and its migrations.
        sqlx::query("DELETE FROM credentials WHERE id IN (SELECT credentials_id FROM migration_targets WHERE target_workload_id = $1)")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM credentials WHERE id = $1")
            .bind(credentials_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!("Deleted workload {} and dependents", abbrev_uuid(&id));
        Ok(true)
    }

    #[instrument(skip(self, request), fields(workload_id = %abbrev_uuid(&request.workload_id), name = %request.name), err)]
    async fn create_mount_point(&self, request: &MountPointCreateDBRequest) -> Result<MountPointDBResponse> {
        let mount_point = sqlx::query_as::<_, MountPoint>(
            "INSERT INTO mount_points (workload_id, name, total_size) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(request.workload_id)
        .bind(&request.name)
        .bind(request.total_size)
        .fetch_one(&self.pool)
        .await?;
        Ok(mount_point)
    }

    async fn get_mount_point(&self, id: MountPointId) -> Result<Option<MountPointDBResponse>> {
        let mount_point = sqlx::query_as::<_, MountPoint>("SELECT * FROM mount_points WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(mount_point)
    }

    async fn get_mount_points_bulk(&self, ids: &[MountPointId]) -> Result<Vec<MountPointDBResponse>> {
        let rows = sqlx::query_as::<_, MountPoint>("SELECT * FROM mount_points WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        let mut by_id: HashMap<MountPointId, MountPoint> = rows.into_iter().map(|mp| (mp.id, mp)).collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn list_mount_points(&self, filter: &MountPointFilter) -> Result<Vec<MountPointDBResponse>> {
        let rows = sqlx::query_as::<_, MountPoint>(
            r#"
            SELECT * FROM mount_points
            WHERE ($1::uuid IS NULL OR workload_id = $1)
            ORDER BY created_at, id
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(filter.workload_id)
        .bind(filter.page.skip)
        .bind(filter.page.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn list_mount_points_for_workloads(
        &self,
        workload_ids: &[WorkloadId],
    ) -> Result<HashMap<WorkloadId, Vec<MountPointDBResponse>>> {
        let rows = sqlx::query_as::<_, MountPoint>("SELECT * FROM mount_points WHERE workload_id = ANY($1) ORDER BY created_at, id")
            .bind(workload_ids)
            .fetch_all(&self.pool)
            .await?;

        let mut grouped: HashMap<WorkloadId, Vec<MountPointDBResponse>> = HashMap::new();
        for mount_point in rows {
            grouped.entry(mount_point.workload_id).or_default().push(mount_point);
        }
        Ok(grouped)
    }

    #[instrument(skip(self, request), fields(mount_point_id = %abbrev_uuid(&id)), err)]
    async fn update_mount_point(&self, id: MountPointId, request: &MountPointUpdateDBRequest) -> Result<MountPointDBResponse> {
        let mount_point = sqlx::query_as::<_, MountPoint>(
            r#"
            UPDATE mount_points SET
                name = COALESCE($2, name),
                total_size = COALESCE($3, total_size),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(request.name.as_deref())
        .bind(request.total_size)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DbError::NotFound)?;
        Ok(mount_point)
    }

    #[instrument(skip(self), fields(mount_point_id = %abbrev_uuid(&id)), err)]
    async fn delete_mount_point(&self, id: MountPointId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM mount_points WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, mount_points), fields(workload_id = %abbrev_uuid(&workload_id), count = mount_points.len()), err)]
    async fn replace_mount_points(&self, workload_id: WorkloadId, mount_points: &[MountPointSpec]) -> Result<Vec<MountPointDBResponse>> {
        let mut tx = self.pool.begin().await?;

        // Row lock serialises concurrent replacements of the same workload
        sqlx::query_scalar::<_, WorkloadId>("SELECT id FROM workloads WHERE id = $1 FOR UPDATE")
            .bind(workload_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;

        sqlx::query("DELETE FROM mount_points WHERE workload_id = $1")
            .bind(workload_id)
            .execute(&mut *tx)
            .await?;

        let mut created = Vec::with_capacity(mount_points.len());
        for spec in mount_points {
            let mount_point = sqlx::query_as::<_, MountPoint>(
                "INSERT INTO mount_points (workload_id, name, total_size) VALUES ($1, $2, $3) RETURNING *",
            )
            .bind(workload_id)
            .bind(&spec.name)
            .bind(spec.total_size)
            .fetch_one(&mut *tx)
            .await?;
            created.push(mount_point);
        }

        tx.commit().await?;
        Ok(created)
    }

    #[instrument(skip(self, request), fields(target_workload_id = %abbrev_uuid(&request.target_workload_id)), err)]
    async fn create_migration_target(&self, request: &MigrationTargetCreateDBRequest) -> Result<MigrationTargetDBResponse> {
        let mut tx = self.pool.begin().await?;
        let credentials = insert_credentials(&mut tx, &request.credentials).await?;
        let target = sqlx::query_as::<_, MigrationTarget>(
            r#"
            INSERT INTO migration_targets (cloud_type, credentials_id, target_workload_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(request.cloud_type)
        .bind(credentials.id)
        .bind(request.target_workload_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(MigrationTargetDBResponse::new(target, credentials))
    }

    async fn get_migration_target(&self, id: MigrationTargetId) -> Result<Option<MigrationTargetDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        let Some(target) = sqlx::query_as::<_, MigrationTarget>("SELECT * FROM migration_targets WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };
        let credentials = fetch_credentials(&mut conn, target.credentials_id).await?;
        Ok(Some(MigrationTargetDBResponse::new(target, credentials)))
    }

    async fn list_migration_targets(&self, filter: &MigrationTargetFilter) -> Result<Vec<MigrationTargetDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        let targets = sqlx::query_as::<_, MigrationTarget>(
            r#"
            SELECT * FROM migration_targets
            WHERE ($1::uuid IS NULL OR target_workload_id = $1)
            ORDER BY created_at, id
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(filter.target_workload_id)
        .bind(filter.page.skip)
        .bind(filter.page.limit)
        .fetch_all(&mut *conn)
        .await?;

        let ids: Vec<CredentialsId> = targets.iter().map(|t| t.credentials_id).collect();
        let mut credentials = fetch_credentials_bulk(&mut conn, &ids).await?;
        targets
            .into_iter()
            .map(|t| {
                let creds = take_credentials(&mut credentials, t.credentials_id)?;
                Ok(MigrationTargetDBResponse::new(t, creds))
            })
            .collect()
    }

    #[instrument(skip(self, request), fields(target_id = %abbrev_uuid(&id)), err)]
    async fn update_migration_target(
        &self,
        id: MigrationTargetId,
        request: &MigrationTargetUpdateDBRequest,
    ) -> Result<MigrationTargetDBResponse> {
        let mut tx = self.pool.begin().await?;
        let target = sqlx::query_as::<_, MigrationTarget>(
            r#"
            UPDATE migration_targets SET
                cloud_type = COALESCE($2, cloud_type),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(request.cloud_type)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(DbError::NotFound)?;

        let credentials = match request.credentials.as_ref().filter(|u| !u.is_empty()) {
            Some(update) => update_credentials(&mut tx, target.credentials_id, update).await?,
            None => fetch_credentials(&mut tx, target.credentials_id).await?,
        };
        tx.commit().await?;
        Ok(MigrationTargetDBResponse::new(target, credentials))
    }

    #[instrument(skip(self), fields(target_id = %abbrev_uuid(&id)), err)]
    async fn delete_migration_target(&self, id: MigrationTargetId) -> Result<bool> {
        // Cascades to the target and its migrations
        let result = sqlx::query("DELETE FROM credentials WHERE id = (SELECT credentials_id FROM migration_targets WHERE id = $1)")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, request), fields(source_workload_id = %abbrev_uuid(&request.source_workload_id)), err)]
    async fn create_migration(&self, request: &MigrationCreateDBRequest) -> Result<MigrationDBResponse> {
        let mut tx = self.pool.begin().await?;
        let migration = sqlx::query_as::<_, Migration>(
            "INSERT INTO migrations (source_workload_id, migration_target_id) VALUES ($1, $2) RETURNING *",
        )
        .bind(request.source_workload_id)
        .bind(request.migration_target_id)
        .fetch_one(&mut *tx)
        .await?;
        write_selection(&mut tx, migration.id, &request.selected_mount_points).await?;
        tx.commit().await?;
        Ok(MigrationDBResponse::new(migration, request.selected_mount_points.clone()))
    }

    async fn get_migration(&self, id: MigrationId) -> Result<Option<MigrationDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        let Some(migration) = sqlx::query_as::<_, Migration>("SELECT * FROM migrations WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(migration_response(&mut conn, migration).await?))
    }

    async fn list_migrations(&self, filter: &MigrationFilter) -> Result<Vec<MigrationDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        let migrations = sqlx::query_as::<_, Migration>(
            r#"
            SELECT * FROM migrations
            WHERE ($1::text IS NULL OR state = $1)
              AND ($2::uuid IS NULL OR source_workload_id = $2)
            ORDER BY created_at, id
            OFFSET $3 LIMIT $4
            "#,
        )
        .bind(filter.state.map(|s| s.as_str()))
        .bind(filter.source_workload_id)
        .bind(filter.page.skip)
        .bind(filter.page.limit)
        .fetch_all(&mut *conn)
        .await?;

        let ids: Vec<MigrationId> = migrations.iter().map(|m| m.id).collect();
        let mut selections = fetch_selections(&mut conn, &ids).await?;
        Ok(migrations
            .into_iter()
            .map(|m| {
                let selection = selections.remove(&m.id).unwrap_or_default();
                MigrationDBResponse::new(m, selection)
            })
            .collect())
    }

    #[instrument(skip(self, request), fields(migration_id = %abbrev_uuid(&id)), err)]
    async fn update_migration(&self, id: MigrationId, request: &MigrationUpdateDBRequest) -> Result<MigrationDBResponse> {
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_as::<_, Migration>("SELECT * FROM migrations WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(DbError::NotFound)?;
        if current.state == MigrationState::Running {
            return Err(protected_running_migration(Operation::Update, id));
        }

        let migration = sqlx::query_as::<_, Migration>(
            r#"
            UPDATE migrations SET
                migration_target_id = COALESCE($2, migration_target_id),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(request.migration_target_id)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(selection) = &request.selected_mount_points {
            write_selection(&mut tx, id, selection).await?;
        }
        let response = migration_response(&mut tx, migration).await?;
        tx.commit().await?;
        Ok(response)
    }

    #[instrument(skip(self), fields(migration_id = %abbrev_uuid(&id)), err)]
    async fn delete_migration(&self, id: MigrationId) -> Result<bool> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query("DELETE FROM migrations WHERE id = $1 AND state <> 'running'")
            .bind(id)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if migration_exists(&mut conn, id).await? {
            return Err(protected_running_migration(Operation::Delete, id));
        }
        Ok(false)
    }

    async fn try_start_migration(&self, id: MigrationId) -> Result<Option<MigrationDBResponse>> {
        let mut conn = self.pool.acquire().await?;
        let started = sqlx::query_as::<_, Migration>(
            r#"
            UPDATE migrations SET state = 'running', updated_at = NOW()
            WHERE id = $1 AND state <> 'running'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        match started {
            Some(migration) => Ok(Some(migration_response(&mut conn, migration).await?)),
            None if migration_exists(&mut conn, id).await? => Ok(None),
            None => Err(DbError::NotFound),
        }
    }

    async fn set_migration_state(&self, id: MigrationId, state: MigrationState) -> Result<MigrationDBResponse> {
        let mut conn = self.pool.acquire().await?;
        let migration = sqlx::query_as::<_, Migration>("UPDATE migrations SET state = $2, updated_at = NOW() WHERE id = $1 RETURNING *")
            .bind(id)
            .bind(state)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(DbError::NotFound)?;
        migration_response(&mut conn, migration).await
    }

    async fn fail_interrupted_migrations(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE migrations SET state = 'error', updated_at = NOW() WHERE state = 'running'")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(all(test, feature = "postgres-tests"))]
mod tests {
    use super::*;
    use crate::db::errors::{MOUNT_POINT_NAME_CONSTRAINT, WORKLOAD_IP_CONSTRAINT};
    use crate::db::models::migration_targets::CloudType;

    fn credentials(username: &str) -> CredentialsCreateDBRequest {
        CredentialsCreateDBRequest {
            username: username.to_string(),
            password: "secret".to_string(),
            domain: "corp.local".to_string(),
        }
    }

    async fn workload(storage: &PostgresStorage, ip: &str) -> WorkloadDBResponse {
        storage
            .create_workload(&WorkloadCreateDBRequest {
                ip: ip.to_string(),
                credentials: credentials("admin"),
            })
            .await
            .unwrap()
    }

    #[sqlx::test]
    async fn test_unique_constraints(pool: PgPool) {
        let storage = PostgresStorage::new(pool);
        let w = workload(&storage, "10.0.0.1").await;

        let err = storage
            .create_workload(&WorkloadCreateDBRequest {
                ip: "10.0.0.1".to_string(),
                credentials: credentials("other"),
            })
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on(WORKLOAD_IP_CONSTRAINT));

        let request = MountPointCreateDBRequest {
            workload_id: w.id,
            name: "D:\\".to_string(),
            total_size: 10,
        };
        storage.create_mount_point(&request).await.unwrap();
        let err = storage.create_mount_point(&request).await.unwrap_err();
        assert!(err.is_unique_violation_on(MOUNT_POINT_NAME_CONSTRAINT));
    }

    #[sqlx::test]
    async fn test_ip_cannot_be_rewritten(pool: PgPool) {
        let storage = PostgresStorage::new(pool.clone());
        let w = workload(&storage, "10.0.0.1").await;

        let result = sqlx::query("UPDATE workloads SET ip = '10.0.0.2' WHERE id = $1")
            .bind(w.id)
            .execute(&pool)
            .await;
        assert!(matches!(result.map_err(DbError::from), Err(DbError::CheckViolation { .. })));
    }

    #[sqlx::test]
    async fn test_migration_lifecycle_and_cascade(pool: PgPool) {
        let storage = PostgresStorage::new(pool);
        let source = workload(&storage, "10.0.0.1").await;
        let destination = workload(&storage, "10.0.0.2").await;
        let d = storage
            .create_mount_point(&MountPointCreateDBRequest {
                workload_id: source.id,
                name: "D:\\".to_string(),
                total_size: 75,
            })
            .await
            .unwrap();
        let target = storage
            .create_migration_target(&MigrationTargetCreateDBRequest {
                cloud_type: CloudType::Vsphere,
                credentials: credentials("cloud"),
                target_workload_id: destination.id,
            })
            .await
            .unwrap();
        let migration = storage
            .create_migration(&MigrationCreateDBRequest {
                source_workload_id: source.id,
                migration_target_id: target.id,
                selected_mount_points: vec![d.id],
            })
            .await
            .unwrap();
        assert_eq!(migration.state, MigrationState::NotStarted);

        assert!(storage.try_start_migration(migration.id).await.unwrap().is_some());
        assert!(storage.try_start_migration(migration.id).await.unwrap().is_none());
        assert!(matches!(
            storage.delete_migration(migration.id).await,
            Err(DbError::ProtectedEntity { .. })
        ));

        let copied = storage
            .replace_mount_points(destination.id, &[MountPointSpec::from(&d)])
            .await
            .unwrap();
        assert_eq!(copied.len(), 1);
        assert_eq!(copied[0].workload_id, destination.id);

        let done = storage.set_migration_state(migration.id, MigrationState::Success).await.unwrap();
        assert_eq!(done.selected_mount_points, vec![d.id]);

        assert!(storage.delete_workload(destination.id).await.unwrap());
        assert!(storage.get_migration_target(target.id).await.unwrap().is_none());
        assert!(storage.get_migration(migration.id).await.unwrap().is_none());

        let leftover: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM credentials")
            .fetch_one(storage.pool())
            .await
            .unwrap();
        assert_eq!(leftover, 1);
    }
}
