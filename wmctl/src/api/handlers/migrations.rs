use crate::AppState;
use crate::api::models::migrations::{
    ListMigrationsQuery, MigrationCreate, MigrationResponse, MigrationUpdate, RunMigrationQuery, RunMigrationResponse,
};
use crate::config::RunMode;
use crate::db::errors::DbError;
use crate::db::handlers::{MigrationFilter, MountPointFilter};
use crate::db::models::migrations::{MigrationCreateDBRequest, MigrationState, MigrationUpdateDBRequest};
use crate::errors::{Error, Result};
use crate::migration::MigrationError;
use crate::tasks::{JobQueue, MigrationJob};
use crate::types::{MigrationId, MountPointId, WorkloadId, abbrev_uuid};
use crate::validation::ensure_selection_on_source;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::sync::Arc;
use tracing::info;

fn migration_not_found(id: MigrationId) -> Error {
    Error::NotFound {
        resource: "Migration".to_string(),
        id: id.to_string(),
    }
}

/// Check a requested selection against the source workload's mount points
async fn resolve_selection(state: &AppState, source_workload_id: WorkloadId, requested: &[MountPointId]) -> Result<Vec<MountPointId>> {
    let available = state
        .storage
        .list_mount_points(&MountPointFilter::for_workload(source_workload_id))
        .await?;
    Ok(ensure_selection_on_source(source_workload_id, &available, requested)?)
}

#[utoipa::path(
    get,
    path = "/migrations",
    tag = "migrations",
    summary = "List migrations",
    responses(
        (status = 200, description = "List of migrations", body = Vec<MigrationResponse>),
        (status = 500, description = "Internal server error")
    ),
    params(ListMigrationsQuery)
)]
#[tracing::instrument(skip_all)]
pub async fn list_migrations(
    State(state): State<AppState>,
    Query(query): Query<ListMigrationsQuery>,
) -> Result<Json<Vec<MigrationResponse>>> {
    let filter = MigrationFilter {
        state: query.state,
        source_workload_id: query.source_workload_id,
        page: query.pagination.filter(),
    };
    let migrations = state.storage.list_migrations(&filter).await?;
    Ok(Json(migrations.into_iter().map(MigrationResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/migrations",
    tag = "migrations",
    summary = "Create migration",
    description = "Creates a migration in the `not_started` state. Every selected mount point must belong to the source workload.",
    request_body = MigrationCreate,
    responses(
        (status = 201, description = "Migration created successfully", body = MigrationResponse),
        (status = 400, description = "Selected mount point not on the source workload, or unknown source or target"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all, fields(source_workload_id = %abbrev_uuid(&create.source_workload_id)))]
pub async fn create_migration(
    State(state): State<AppState>,
    Json(create): Json<MigrationCreate>,
) -> Result<(StatusCode, Json<MigrationResponse>)> {
    let selected_mount_points = resolve_selection(&state, create.source_workload_id, &create.selected_mount_points).await?;

    let request = MigrationCreateDBRequest {
        source_workload_id: create.source_workload_id,
        migration_target_id: create.migration_target_id,
        selected_mount_points,
    };
    let migration = state.storage.create_migration(&request).await?;
    info!(
        "Created migration {} with {} mount point(s)",
        abbrev_uuid(&migration.id),
        migration.selected_mount_points.len()
    );
    Ok((StatusCode::CREATED, Json(MigrationResponse::from(migration))))
}

#[utoipa::path(
    get,
    path = "/migrations/{migration_id}",
    tag = "migrations",
    summary = "Get migration",
    description = "Returns the migration with its current state; poll this while a run is in progress.",
    responses(
        (status = 200, description = "Migration details", body = MigrationResponse),
        (status = 404, description = "Migration not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("migration_id" = uuid::Uuid, Path, description = "Migration ID")
    )
)]
#[tracing::instrument(skip_all, fields(migration_id = %abbrev_uuid(&migration_id)))]
pub async fn get_migration(State(state): State<AppState>, Path(migration_id): Path<MigrationId>) -> Result<Json<MigrationResponse>> {
    match state.storage.get_migration(migration_id).await? {
        Some(migration) => Ok(Json(MigrationResponse::from(migration))),
        None => Err(migration_not_found(migration_id)),
    }
}

#[utoipa::path(
    patch,
    path = "/migrations/{migration_id}",
    tag = "migrations",
    summary = "Update migration",
    description = "Changes the target or the selection. Refused while the migration is running.",
    request_body = MigrationUpdate,
    responses(
        (status = 200, description = "Migration updated successfully", body = MigrationResponse),
        (status = 400, description = "Selected mount point not on the source workload, or unknown target"),
        (status = 404, description = "Migration not found"),
        (status = 409, description = "Migration is running"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("migration_id" = uuid::Uuid, Path, description = "Migration ID")
    )
)]
#[tracing::instrument(skip_all, fields(migration_id = %abbrev_uuid(&migration_id)))]
pub async fn update_migration(
    State(state): State<AppState>,
    Path(migration_id): Path<MigrationId>,
    Json(update): Json<MigrationUpdate>,
) -> Result<Json<MigrationResponse>> {
    let selected_mount_points = match update.selected_mount_points {
        Some(requested) => {
            let current = state
                .storage
                .get_migration(migration_id)
                .await?
                .ok_or_else(|| migration_not_found(migration_id))?;
            Some(resolve_selection(&state, current.source_workload_id, &requested).await?)
        }
        None => None,
    };

    let request = MigrationUpdateDBRequest {
        migration_target_id: update.migration_target_id,
        selected_mount_points,
    };
    let migration = state
        .storage
        .update_migration(migration_id, &request)
        .await
        .map_err(|e| match e {
            DbError::NotFound => migration_not_found(migration_id),
            e => e.into(),
        })?;
    Ok(Json(MigrationResponse::from(migration)))
}

#[utoipa::path(
    delete,
    path = "/migrations/{migration_id}",
    tag = "migrations",
    summary = "Delete migration",
    responses(
        (status = 204, description = "Migration deleted successfully"),
        (status = 404, description = "Migration not found"),
        (status = 409, description = "Migration is running"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("migration_id" = uuid::Uuid, Path, description = "Migration ID")
    )
)]
#[tracing::instrument(skip_all, fields(migration_id = %abbrev_uuid(&migration_id)))]
pub async fn delete_migration(State(state): State<AppState>, Path(migration_id): Path<MigrationId>) -> Result<StatusCode> {
    if state.storage.delete_migration(migration_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(migration_not_found(migration_id))
    }
}

#[utoipa::path(
    post,
    path = "/migrations/{migration_id}/run",
    tag = "migrations",
    summary = "Run migration",
    description = "Runs the migration: the target workload's mount points are replaced by copies of the selection.

In `sync` mode the request blocks until the run finishes and returns the final state.
In `async` mode the run is submitted to the task queue and the request returns immediately with the task ID;
poll the migration or `GET /tasks/{task_id}` for progress.

A selection containing the `C:\\` volume is refused in both modes without changing the migration.",
    responses(
        (status = 200, description = "Migration ran to completion (sync mode)", body = RunMigrationResponse),
        (status = 202, description = "Migration submitted (async mode)", body = RunMigrationResponse),
        (status = 400, description = "Selection contains the boot volume"),
        (status = 404, description = "Migration not found"),
        (status = 409, description = "Migration is already running"),
        (status = 500, description = "Copying mount points failed; the migration is now in the error state")
    ),
    params(
        ("migration_id" = uuid::Uuid, Path, description = "Migration ID"),
        RunMigrationQuery
    )
)]
#[tracing::instrument(skip_all, fields(migration_id = %abbrev_uuid(&migration_id)))]
pub async fn run_migration(
    State(state): State<AppState>,
    Path(migration_id): Path<MigrationId>,
    Query(query): Query<RunMigrationQuery>,
) -> Result<(StatusCode, Json<RunMigrationResponse>)> {
    let simulated_delay = state.config.migrations.simulated_delay;

    match query.mode.unwrap_or(state.config.migrations.run_mode) {
        RunMode::Sync => {
            let migration = state.runner.execute(migration_id, simulated_delay).await?;
            Ok((
                StatusCode::OK,
                Json(RunMigrationResponse {
                    state: migration.state,
                    task_id: None,
                }),
            ))
        }
        RunMode::Async => {
            // Refuse what can never succeed before handing it to the queue
            let plan = state.runner.preflight(migration_id).await?;
            if plan.migration.state == MigrationState::Running {
                return Err(MigrationError::AlreadyRunning(migration_id).into());
            }

            let job = MigrationJob::new(state.runner.clone(), migration_id, simulated_delay);
            let handle = state.queue.submit(Arc::new(job));
            info!(
                "Submitted migration {} as task {}",
                abbrev_uuid(&migration_id),
                abbrev_uuid(&handle.id())
            );
            Ok((
                StatusCode::ACCEPTED,
                Json(RunMigrationResponse {
                    state: plan.migration.state,
                    task_id: Some(handle.id()),
                }),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::api::models::migrations::{MigrationResponse, RunMigrationResponse};
    use crate::api::models::mount_points::MountPointResponse;
    use crate::config::RunMode;
    use crate::db::handlers::Storage;
    use crate::db::models::migrations::MigrationState;
    use crate::tasks::JobQueue;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::time::Duration;

    fn names_and_sizes(mut mount_points: Vec<MountPointResponse>) -> Vec<(String, i64)> {
        mount_points.sort_by(|a, b| a.name.cmp(&b.name));
        mount_points.into_iter().map(|mp| (mp.name, mp.total_size)).collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_create_migration_starts_not_started() {
        let (app, state) = create_test_app(create_test_config()).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;

        let response = app
            .post("/api/v1/migrations")
            .json(&json!({
                "source_workload_id": scenario.source.id,
                "migration_target_id": scenario.target.id,
                "selected_mount_points": [scenario.d_drive.id],
            }))
            .await;
        response.assert_status(StatusCode::CREATED);
        let migration: MigrationResponse = response.json();
        assert_eq!(migration.state, MigrationState::NotStarted);
        assert_eq!(migration.selected_mount_points, vec![scenario.d_drive.id]);

        let listed: Vec<MigrationResponse> = app.get("/api/v1/migrations?state=not_started").await.json();
        assert_eq!(listed.len(), 1);
        let listed: Vec<MigrationResponse> = app.get("/api/v1/migrations?state=success").await.json();
        assert!(listed.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_selection_must_belong_to_source() {
        let (app, state) = create_test_app(create_test_config()).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;
        let foreign = create_mount_point(state.storage.as_ref(), scenario.destination.id, "E:\\", 5).await;

        let response = app
            .post("/api/v1/migrations")
            .json(&json!({
                "source_workload_id": scenario.source.id,
                "migration_target_id": scenario.target.id,
                "selected_mount_points": [scenario.d_drive.id, foreign.id],
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<serde_json::Value>()["error"], "foreign_mount_point");

        let migration = create_migration(state.storage.as_ref(), &scenario, vec![scenario.d_drive.id]).await;
        let response = app
            .patch(&format!("/api/v1/migrations/{}", migration.id))
            .json(&json!({"selected_mount_points": [foreign.id]}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn test_sync_run_copies_selection() {
        let mut config = create_test_config();
        config.migrations.run_mode = RunMode::Sync;
        let (app, state) = create_test_app(config).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;
        let migration = create_migration(state.storage.as_ref(), &scenario, vec![scenario.d_drive.id]).await;

        let response = app.post(&format!("/api/v1/migrations/{}/run", migration.id)).await;
        response.assert_status_ok();
        let run: RunMigrationResponse = response.json();
        assert_eq!(run.state, MigrationState::Success);
        assert!(run.task_id.is_none());

        let destination: Vec<MountPointResponse> = app
            .get(&format!("/api/v1/mountpoints?workload_id={}", scenario.destination.id))
            .await
            .json();
        assert_eq!(names_and_sizes(destination), vec![("D:\\".to_string(), 75)]);

        let reloaded: MigrationResponse = app.get(&format!("/api/v1/migrations/{}", migration.id)).await.json();
        assert_eq!(reloaded.state, MigrationState::Success);
    }

    #[test_log::test(tokio::test)]
    async fn test_boot_volume_is_refused_in_both_modes() {
        let (app, state) = create_test_app(create_test_config()).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;
        let migration = create_migration(
            state.storage.as_ref(),
            &scenario,
            vec![scenario.c_drive.id, scenario.d_drive.id],
        )
        .await;

        for mode in ["sync", "async"] {
            let response = app
                .post(&format!("/api/v1/migrations/{}/run?mode={mode}", migration.id))
                .await;
            response.assert_status(StatusCode::BAD_REQUEST);
            assert_eq!(response.json::<serde_json::Value>()["error"], "forbidden_volume");
        }

        let reloaded = state.storage.get_migration(migration.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, MigrationState::NotStarted);
        let destination: Vec<MountPointResponse> = app
            .get(&format!("/api/v1/mountpoints?workload_id={}", scenario.destination.id))
            .await
            .json();
        assert!(destination.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_async_run_returns_task() {
        let (app, state) = create_test_app(create_test_config()).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;
        let migration = create_migration(state.storage.as_ref(), &scenario, vec![scenario.d_drive.id]).await;

        let response = app.post(&format!("/api/v1/migrations/{}/run", migration.id)).await;
        response.assert_status(StatusCode::ACCEPTED);
        let run: RunMigrationResponse = response.json();
        assert_eq!(run.state, MigrationState::NotStarted);
        let task_id = run.task_id.expect("async runs return a task");

        let handle = state.queue.get(task_id).expect("task is tracked");
        handle.wait().await;

        let task: serde_json::Value = app.get(&format!("/api/v1/tasks/{task_id}")).await.json();
        assert_eq!(task["kind"], "migration");
        assert_eq!(task["status"], "succeeded");
        assert_eq!(task["attempts"], 1);

        let reloaded: MigrationResponse = app.get(&format!("/api/v1/migrations/{}", migration.id)).await.json();
        assert_eq!(reloaded.state, MigrationState::Success);
    }

    #[test_log::test(tokio::test)]
    async fn test_running_migration_is_protected() {
        let mut config = create_test_config();
        config.migrations.simulated_delay = Duration::from_millis(300);
        let (app, state) = create_test_app(config).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;
        let migration = create_migration(state.storage.as_ref(), &scenario, vec![scenario.d_drive.id]).await;
        let path = format!("/api/v1/migrations/{}", migration.id);

        let run: RunMigrationResponse = app.post(&format!("{path}/run")).await.json();
        let handle = state.queue.get(run.task_id.unwrap()).unwrap();

        // Wait for the task to claim the migration
        while state.storage.get_migration(migration.id).await.unwrap().unwrap().state != MigrationState::Running {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        app.post(&format!("{path}/run")).await.assert_status(StatusCode::CONFLICT);
        app.delete(&path).await.assert_status(StatusCode::CONFLICT);
        app.patch(&path)
            .json(&json!({"selected_mount_points": []}))
            .await
            .assert_status(StatusCode::CONFLICT);

        handle.wait().await;
        let reloaded: MigrationResponse = app.get(&path).await.json();
        assert_eq!(reloaded.state, MigrationState::Success);
        app.delete(&path).await.assert_status(StatusCode::NO_CONTENT);
    }

    #[test_log::test(tokio::test)]
    async fn test_copy_failure_is_reported_in_sync_mode() {
        let mut config = create_test_config();
        config.migrations.run_mode = RunMode::Sync;
        let storage = std::sync::Arc::new(FaultyStorage::failing_replacements(1));
        let (app, state) = create_test_app_with_storage(config, storage).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;
        let migration = create_migration(state.storage.as_ref(), &scenario, vec![scenario.d_drive.id]).await;
        let path = format!("/api/v1/migrations/{}", migration.id);

        let response = app.post(&format!("{path}/run")).await;
        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.json::<serde_json::Value>()["error"], "execution_failure");

        let reloaded: MigrationResponse = app.get(&path).await.json();
        assert_eq!(reloaded.state, MigrationState::Error);

        // A failed migration can be run again
        let run: RunMigrationResponse = app.post(&format!("{path}/run")).await.json();
        assert_eq!(run.state, MigrationState::Success);
    }

    #[test_log::test(tokio::test)]
    async fn test_unknown_migration() {
        let (app, _state) = create_test_app(create_test_config()).await;
        let id = uuid::Uuid::new_v4();

        app.get(&format!("/api/v1/migrations/{id}"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        app.post(&format!("/api/v1/migrations/{id}/run"))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
