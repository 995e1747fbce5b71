use crate::AppState;
use crate::api::models::mount_points::{ListMountPointsQuery, MountPointCreate, MountPointResponse, MountPointUpdate};
use crate::db::errors::DbError;
use crate::db::handlers::MountPointFilter;
use crate::db::models::mount_points::{MountPointCreateDBRequest, MountPointUpdateDBRequest};
use crate::errors::{Error, Result};
use crate::types::{MountPointId, abbrev_uuid};
use crate::validation::{validate_mount_point_name, validate_total_size};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

fn mount_point_not_found(id: MountPointId) -> Error {
    Error::NotFound {
        resource: "Mount point".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    get,
    path = "/mountpoints",
    tag = "mount_points",
    summary = "List mount points",
    responses(
        (status = 200, description = "List of mount points", body = Vec<MountPointResponse>),
        (status = 500, description = "Internal server error")
    ),
    params(ListMountPointsQuery)
)]
#[tracing::instrument(skip_all)]
pub async fn list_mount_points(
    State(state): State<AppState>,
    Query(query): Query<ListMountPointsQuery>,
) -> Result<Json<Vec<MountPointResponse>>> {
    let filter = MountPointFilter {
        workload_id: query.workload_id,
        page: query.pagination.filter(),
    };
    let mount_points = state.storage.list_mount_points(&filter).await?;
    Ok(Json(mount_points.into_iter().map(MountPointResponse::from).collect()))
}

#[utoipa::path(
    post,
    path = "/mountpoints",
    tag = "mount_points",
    summary = "Create mount point",
    request_body = MountPointCreate,
    responses(
        (status = 201, description = "Mount point created successfully", body = MountPointResponse),
        (status = 400, description = "Invalid name or size, or unknown workload"),
        (status = 409, description = "The workload already has a mount point with this name"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all, fields(workload_id = %abbrev_uuid(&create.workload_id)))]
pub async fn create_mount_point(
    State(state): State<AppState>,
    Json(create): Json<MountPointCreate>,
) -> Result<(StatusCode, Json<MountPointResponse>)> {
    validate_mount_point_name(&create.name)?;
    validate_total_size(create.total_size)?;

    let request = MountPointCreateDBRequest {
        workload_id: create.workload_id,
        name: create.name,
        total_size: create.total_size,
    };
    let mount_point = state.storage.create_mount_point(&request).await?;
    Ok((StatusCode::CREATED, Json(MountPointResponse::from(mount_point))))
}

#[utoipa::path(
    get,
    path = "/mountpoints/{mount_point_id}",
    tag = "mount_points",
    summary = "Get mount point",
    responses(
        (status = 200, description = "Mount point details", body = MountPointResponse),
        (status = 404, description = "Mount point not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("mount_point_id" = uuid::Uuid, Path, description = "Mount point ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_mount_point(
    State(state): State<AppState>,
    Path(mount_point_id): Path<MountPointId>,
) -> Result<Json<MountPointResponse>> {
    match state.storage.get_mount_point(mount_point_id).await? {
        Some(mount_point) => Ok(Json(MountPointResponse::from(mount_point))),
        None => Err(mount_point_not_found(mount_point_id)),
    }
}

#[utoipa::path(
    patch,
    path = "/mountpoints/{mount_point_id}",
    tag = "mount_points",
    summary = "Update mount point",
    request_body = MountPointUpdate,
    responses(
        (status = 200, description = "Mount point updated successfully", body = MountPointResponse),
        (status = 400, description = "Invalid name or size"),
        (status = 404, description = "Mount point not found"),
        (status = 409, description = "The workload already has a mount point with this name"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("mount_point_id" = uuid::Uuid, Path, description = "Mount point ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_mount_point(
    State(state): State<AppState>,
    Path(mount_point_id): Path<MountPointId>,
    Json(update): Json<MountPointUpdate>,
) -> Result<Json<MountPointResponse>> {
    if let Some(name) = &update.name {
        validate_mount_point_name(name)?;
    }
    if let Some(total_size) = update.total_size {
        validate_total_size(total_size)?;
    }

    let request = MountPointUpdateDBRequest {
        name: update.name,
        total_size: update.total_size,
    };
    let mount_point = state
        .storage
        .update_mount_point(mount_point_id, &request)
        .await
        .map_err(|e| match e {
            DbError::NotFound => mount_point_not_found(mount_point_id),
            e => e.into(),
        })?;
    Ok(Json(MountPointResponse::from(mount_point)))
}

#[utoipa::path(
    delete,
    path = "/mountpoints/{mount_point_id}",
    tag = "mount_points",
    summary = "Delete mount point",
    description = "Deletes the mount point and removes it from every migration selection.",
    responses(
        (status = 204, description = "Mount point deleted successfully"),
        (status = 404, description = "Mount point not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("mount_point_id" = uuid::Uuid, Path, description = "Mount point ID")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_mount_point(State(state): State<AppState>, Path(mount_point_id): Path<MountPointId>) -> Result<StatusCode> {
    if state.storage.delete_mount_point(mount_point_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(mount_point_not_found(mount_point_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::api::models::mount_points::MountPointResponse;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::json;
    use uuid::Uuid;

    #[test_log::test(tokio::test)]
    async fn test_create_and_filter_mount_points() {
        let (app, state) = create_test_app(create_test_config()).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;

        let response = app
            .post("/api/v1/mountpoints")
            .json(&json!({"workload_id": scenario.destination.id, "name": "E:\\", "total_size": 20}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let created: MountPointResponse = response.json();
        assert_eq!(created.workload_id, scenario.destination.id);

        let all: Vec<MountPointResponse> = app.get("/api/v1/mountpoints").await.json();
        assert_eq!(all.len(), 3);

        let on_source: Vec<MountPointResponse> = app
            .get(&format!("/api/v1/mountpoints?workload_id={}", scenario.source.id))
            .await
            .json();
        let mut names: Vec<_> = on_source.into_iter().map(|mp| mp.name).collect();
        names.sort();
        assert_eq!(names, vec!["C:\\", "D:\\"]);
    }

    #[test_log::test(tokio::test)]
    async fn test_mount_point_constraints() {
        let (app, state) = create_test_app(create_test_config()).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;

        // Same name on the same workload
        let response = app
            .post("/api/v1/mountpoints")
            .json(&json!({"workload_id": scenario.source.id, "name": "D:\\", "total_size": 10}))
            .await;
        response.assert_status(StatusCode::CONFLICT);

        // Same name on another workload is fine
        app.post("/api/v1/mountpoints")
            .json(&json!({"workload_id": scenario.destination.id, "name": "D:\\", "total_size": 10}))
            .await
            .assert_status(StatusCode::CREATED);

        let response = app
            .post("/api/v1/mountpoints")
            .json(&json!({"workload_id": scenario.source.id, "name": "F:\\", "total_size": 0}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<serde_json::Value>()["error"], "invalid_size");

        let response = app
            .post("/api/v1/mountpoints")
            .json(&json!({"workload_id": Uuid::new_v4(), "name": "F:\\", "total_size": 5}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[test_log::test(tokio::test)]
    async fn test_update_and_delete_mount_point() {
        let (app, state) = create_test_app(create_test_config()).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;
        let path = format!("/api/v1/mountpoints/{}", scenario.d_drive.id);

        let updated: MountPointResponse = app
            .patch(&path)
            .json(&json!({"name": "E:\\", "total_size": 80}))
            .await
            .json();
        assert_eq!((updated.name.as_str(), updated.total_size), ("E:\\", 80));

        app.patch(&path)
            .json(&json!({"name": "  "}))
            .await
            .assert_status(StatusCode::BAD_REQUEST);

        app.delete(&path).await.assert_status(StatusCode::NO_CONTENT);
        app.get(&path).await.assert_status(StatusCode::NOT_FOUND);
        app.patch(&path)
            .json(&json!({"total_size": 1}))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
