use crate::AppState;
use crate::api::models::migration_targets::{
    ListMigrationTargetsQuery, MigrationTargetCreate, MigrationTargetResponse, MigrationTargetUpdate,
};
use crate::db::errors::DbError;
use crate::db::handlers::MigrationTargetFilter;
use crate::db::models::migration_targets::{MigrationTargetCreateDBRequest, MigrationTargetUpdateDBRequest};
use crate::errors::{Error, Result};
use crate::types::{MigrationTargetId, abbrev_uuid};
use crate::validation::{ValidationError, parse_cloud_type};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

fn target_not_found(id: MigrationTargetId) -> Error {
    Error::NotFound {
        resource: "Migration target".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/targets",
    tag = "migration_targets",
    summary = "List migration targets",
    responses(
        (status = 200, description = "List of migration targets", body = Vec<MigrationTargetResponse>),
        (status = 500, description = "Internal server error")
    ),
    params(ListMigrationTargetsQuery)
)]
#[tracing::instrument(skip_all)]
pub async fn list_migration_targets(
    State(state): State<AppState>,
    Query(query): Query<ListMigrationTargetsQuery>,
) -> Result<Json<Vec<MigrationTargetResponse>>> {
    let filter = MigrationTargetFilter {
        target_workload_id: query.target_workload_id,
        page: query.pagination.filter(),
    };
    let targets = state.storage.list_migration_targets(&filter).await?;
    Ok(Json(targets.into_iter().map(MigrationTargetResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/targets",
    tag = "migration_targets",
    summary = "Create migration target",
    request_body = MigrationTargetCreate,
    responses(
        (status = 201, description = "Migration target created successfully", body = MigrationTargetResponse),
        (status = 400, description = "Invalid cloud type or credentials, or unknown target workload"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_migration_target(
    State(state): State<AppState>,
    Json(create): Json<MigrationTargetCreate>,
) -> Result<(StatusCode, Json<MigrationTargetResponse>)> {
    let request = MigrationTargetCreateDBRequest {
        cloud_type: parse_cloud_type(&create.cloud_type)?,
        credentials: create.credentials.into_create()?,
        target_workload_id: create.target_workload_id,
    };
    let target = state.storage.create_migration_target(&request).await?;
    info!(
        "Created {} migration target {} for workload {}",
        target.cloud_type,
        abbrev_uuid(&target.id),
        abbrev_uuid(&target.target_workload_id)
    );
    Ok((StatusCode::CREATED, Json(MigrationTargetResponse::from(target))))
}

#[utoipa::path(
    get,
    path = "/targets/{target_id}",
    tag = "migration_targets",
    summary = "Get migration target",
    responses(
        (status = 200, description = "Migration target details", body = MigrationTargetResponse),
        (status = 404, description = "Migration target not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("target_id" = uuid::Uuid, Path, description = "Migration target ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_migration_target(
    State(state): State<AppState>,
    Path(target_id): Path<MigrationTargetId>,
) -> Result<Json<MigrationTargetResponse>> {
    match state.storage.get_migration_target(target_id).await? {
        Some(target) => Ok(Json(MigrationTargetResponse::from(target))),
        None => Err(target_not_found(target_id)),
    }
}

#[utoipa::path(
    patch,
    path = "/targets/{target_id}",
    tag = "migration_targets",
    summary = "Update migration target",
    description = "Updates the cloud type and credentials. The target workload is fixed at creation.",
    request_body = MigrationTargetUpdate,
    responses(
        (status = 200, description = "Migration target updated successfully", body = MigrationTargetResponse),
        (status = 400, description = "Invalid cloud type or credentials, or attempt to change the target workload"),
        (status = 404, description = "Migration target not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("target_id" = uuid::Uuid, Path, description = "Migration target ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_migration_target(
    State(state): State<AppState>,
    Path(target_id): Path<MigrationTargetId>,
    Json(update): Json<MigrationTargetUpdate>,
) -> Result<Json<MigrationTargetResponse>> {
    if let Some(requested) = update.target_workload_id {
        let current = state
            .storage
            .get_migration_target(target_id)
            .await?
            .ok_or_else(|| target_not_found(target_id))?;
        if current.target_workload_id != requested {
            return Err(ValidationError::ImmutableFieldViolation {
                field: "target_workload_id",
            }
            .into());
        }
    }

    let request = MigrationTargetUpdateDBRequest {
        cloud_type: update.cloud_type.as_deref().map(parse_cloud_type).transpose()?,
        credentials: update.credentials.map(|c| c.into_update()).transpose()?,
    };
    let target = state
        .storage
        .update_migration_target(target_id, &request)
        .await
        .map_err(|e| match e {
            DbError::NotFound => target_not_found(target_id),
            e => e.into(),
        })?;
    Ok(Json(MigrationTargetResponse::from(target)))
}

#[utoipa::path(
    delete,
    path = "/targets/{target_id}",
    tag = "migration_targets",
    summary = "Delete migration target",
    description = "Deletes the target, its credentials and every migration using it.",
    responses(
        (status = 204, description = "Migration target deleted successfully"),
        (status = 404, description = "Migration target not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("target_id" = uuid::Uuid, Path, description = "Migration target ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_migration_target(State(state): State<AppState>, Path(target_id): Path<MigrationTargetId>) -> Result<StatusCode> {
    if state.storage.delete_migration_target(target_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(target_not_found(target_id))
    }
}
