use crate::AppState;
use crate::api::models::mount_points::MountPointResponse;
use crate::api::models::workloads::{ListWorkloadsQuery, WorkloadCreate, WorkloadResponse, WorkloadUpdate};
use crate::db::errors::{DbError, WORKLOAD_IP_CONSTRAINT};
use crate::db::handlers::MountPointFilter;
use crate::db::models::workloads::{WorkloadCreateDBRequest, WorkloadUpdateDBRequest};
use crate::errors::{Error, Result};
use crate::types::{WorkloadId, abbrev_uuid};
use crate::validation::{ValidationError, ensure_ip_unchanged, normalize_ip};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::info;

fn workload_not_found(id: WorkloadId) -> Error {
    Error::NotFound {
        resource: "Workload".to_string(),
        id: id.to_string(),
    }
}

/// Report a unique violation on the IP column as a duplicate IP
fn duplicate_ip(ip: &str) -> impl FnOnce(DbError) -> Error + '_ {
    move |e| {
        if e.is_unique_violation_on(WORKLOAD_IP_CONSTRAINT) {
            ValidationError::DuplicateIp { ip: ip.to_string() }.into()
        } else {
            e.into()
        }
    }
}

#[utoipa::path(
    get,
    path = "/workloads",
    tag = "workloads",
    summary = "List workloads",
    responses(
        (status = 200, description = "List of workloads", body = Vec<WorkloadResponse>),
        (status = 500, description = "Internal server error")
    ),
    params(ListWorkloadsQuery)
)]
#[tracing::instrument(skip_all)]
pub async fn list_workloads(
    State(state): State<AppState>,
    Query(query): Query<ListWorkloadsQuery>,
) -> Result<Json<Vec<WorkloadResponse>>> {
    let workloads = state.storage.list_workloads(&query.pagination.filter()).await?;

    if !query.includes("mount_points") {
        return Ok(Json(workloads.into_iter().map(WorkloadResponse::from).collect()));
    }

    let ids: Vec<WorkloadId> = workloads.iter().map(|w| w.id).collect();
    let mut mount_points = state.storage.list_mount_points_for_workloads(&ids).await?;
    let response = workloads
        .into_iter()
        .map(|workload| {
            let attached = mount_points
                .remove(&workload.id)
                .unwrap_or_default()
                .into_iter()
                .map(MountPointResponse::from)
                .collect();
            WorkloadResponse::from(workload).with_mount_points(attached)
        })
        .collect();
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/workloads",
    tag = "workloads",
    summary = "Create workload",
    request_body = WorkloadCreate,
    responses(
        (status = 201, description = "Workload created successfully", body = WorkloadResponse),
        (status = 400, description = "Invalid IP address or credentials"),
        (status = 409, description = "A workload with this IP already exists"),
        (status = 500, description = "Internal server error")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_workload(
    State(state): State<AppState>,
    Json(create): Json<WorkloadCreate>,
) -> Result<(StatusCode, Json<WorkloadResponse>)> {
    let ip = normalize_ip(&create.ip)?;
    let credentials = create.credentials.into_create()?;

    let request = WorkloadCreateDBRequest { ip, credentials };
    let workload = state.storage.create_workload(&request).await.map_err(duplicate_ip(&request.ip))?;
    info!("Created workload {} ({})", abbrev_uuid(&workload.id), workload.ip);

    Ok((StatusCode::CREATED, Json(WorkloadResponse::from(workload).with_mount_points(Vec::new()))))
}

#[utoipa::path(
    get,
    path = "/workloads/{workload_id}",
    tag = "workloads",
    summary = "Get workload",
    description = "Returns the workload with its credentials and mount points.",
    responses(
        (status = 200, description = "Workload details", body = WorkloadResponse),
        (status = 404, description = "Workload not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("workload_id" = uuid::Uuid, Path, description = "Workload ID")
    )
)]
#[tracing::instrument(skip_all, fields(workload_id = %abbrev_uuid(&workload_id)))]
pub async fn get_workload(State(state): State<AppState>, Path(workload_id): Path<WorkloadId>) -> Result<Json<WorkloadResponse>> {
    let workload = state
        .storage
        .get_workload(workload_id)
        .await?
        .ok_or_else(|| workload_not_found(workload_id))?;

    let mount_points = state
        .storage
        .list_mount_points(&MountPointFilter::for_workload(workload_id))
        .await?
        .into_iter()
        .map(MountPointResponse::from)
        .collect();

    Ok(Json(WorkloadResponse::from(workload).with_mount_points(mount_points)))
}

#[utoipa::path(
    patch,
    path = "/workloads/{workload_id}",
    tag = "workloads",
    summary = "Update workload",
    description = "Updates the workload's credentials. The IP address cannot be changed.",
    request_body = WorkloadUpdate,
    responses(
        (status = 200, description = "Workload updated successfully", body = WorkloadResponse),
        (status = 400, description = "Attempt to change the IP, or invalid credentials"),
        (status = 404, description = "Workload not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("workload_id" = uuid::Uuid, Path, description = "Workload ID")
    )
)]
#[tracing::instrument(skip_all, fields(workload_id = %abbrev_uuid(&workload_id)))]
pub async fn update_workload(
    State(state): State<AppState>,
    Path(workload_id): Path<WorkloadId>,
    Json(update): Json<WorkloadUpdate>,
) -> Result<Json<WorkloadResponse>> {
    let current = state
        .storage
        .get_workload(workload_id)
        .await?
        .ok_or_else(|| workload_not_found(workload_id))?;
    ensure_ip_unchanged(&current.ip, update.ip.as_deref())?;

    let request = WorkloadUpdateDBRequest {
        credentials: update.credentials.map(|c| c.into_update()).transpose()?,
    };
    let workload = state.storage.update_workload(workload_id, &request).await.map_err(|e| match e {
        DbError::NotFound => workload_not_found(workload_id),
        e => e.into(),
    })?;

    Ok(Json(WorkloadResponse::from(workload)))
}

#[utoipa::path(
    delete,
    path = "/workloads/{workload_id}",
    tag = "workloads",
    summary = "Delete workload",
    description = "Deletes the workload, its credentials and mount points, every migration target pointing at it and every migration referencing it.",
    responses(
        (status = 204, description = "Workload deleted successfully"),
        (status = 404, description = "Workload not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("workload_id" = uuid::Uuid, Path, description = "Workload ID")
    )
)]
#[tracing::instrument(skip_all, fields(workload_id = %abbrev_uuid(&workload_id)))]
pub async fn delete_workload(State(state): State<AppState>, Path(workload_id): Path<WorkloadId>) -> Result<StatusCode> {
    if state.storage.delete_workload(workload_id).await? {
        info!("Deleted workload {}", abbrev_uuid(&workload_id));
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(workload_not_found(workload_id))
    }
}

#[cfg(test)]
mod tests {
    use crate::api::models::workloads::WorkloadResponse;
    use crate::db::handlers::Storage;
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::json;

    fn workload_body(ip: &str) -> serde_json::Value {
        json!({
            "ip": ip,
            "credentials": {"username": "administrator", "password": "s3cret", "domain": "CORP"}
        })
    }

    #[test_log::test(tokio::test)]
    async fn test_create_and_get_workload() {
        let (app, _state) = create_test_app(create_test_config()).await;

        let response = app.post("/api/v1/workloads").json(&workload_body("10.0.0.1")).await;
        response.assert_status(StatusCode::CREATED);
        let created: WorkloadResponse = response.json();
        assert_eq!(created.ip, "10.0.0.1");
        assert_eq!(created.credentials.username, "administrator");

        let body: serde_json::Value = app.get(&format!("/api/v1/workloads/{}", created.id)).await.json();
        assert_eq!(body["ip"], "10.0.0.1");
        assert_eq!(body["mount_points"], json!([]));
        assert!(body["credentials"].get("password").is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_duplicate_ip_is_conflict() {
        let (app, _state) = create_test_app(create_test_config()).await;

        app.post("/api/v1/workloads")
            .json(&workload_body("10.0.0.1"))
            .await
            .assert_status(StatusCode::CREATED);

        let response = app.post("/api/v1/workloads").json(&workload_body("10.0.0.1")).await;
        response.assert_status(StatusCode::CONFLICT);
        let body: serde_json::Value = response.json();
        assert_eq!(body["error"], "duplicate_ip");

        let workloads: Vec<WorkloadResponse> = app.get("/api/v1/workloads").await.json();
        assert_eq!(workloads.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn test_invalid_input_is_rejected() {
        let (app, _state) = create_test_app(create_test_config()).await;

        let response = app.post("/api/v1/workloads").json(&workload_body("not-an-ip")).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<serde_json::Value>()["error"], "invalid_ip");

        let response = app
            .post("/api/v1/workloads")
            .json(&json!({"ip": "10.0.0.9", "credentials": {"username": "u", "domain": "d"}}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<serde_json::Value>()["error"], "missing_field");
    }

    #[test_log::test(tokio::test)]
    async fn test_ip_is_immutable() {
        let (app, state) = create_test_app(create_test_config()).await;
        let workload = create_workload(state.storage.as_ref(), "192.0.2.2").await;
        let path = format!("/api/v1/workloads/{}", workload.id);

        let response = app.patch(&path).json(&json!({"ip": "192.0.2.3"})).await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json::<serde_json::Value>()["error"], "immutable_field_violation");

        // Resubmitting the same IP alongside a credentials change is fine
        let response = app
            .patch(&path)
            .json(&json!({"ip": "192.0.2.2", "credentials": {"password": "rotated"}}))
            .await;
        response.assert_status_ok();

        let stored = state.storage.get_workload(workload.id).await.unwrap().unwrap();
        assert_eq!(stored.ip, "192.0.2.2");
        assert_eq!(stored.credentials.password, "rotated");
    }

    #[test_log::test(tokio::test)]
    async fn test_list_with_mount_points_and_pagination() {
        let (app, state) = create_test_app(create_test_config()).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;

        let workloads: Vec<serde_json::Value> = app.get("/api/v1/workloads?include=mount_points").await.json();
        assert_eq!(workloads.len(), 2);
        let source = workloads
            .iter()
            .find(|w| w["id"] == json!(scenario.source.id))
            .expect("source listed");
        assert_eq!(source["mount_points"].as_array().unwrap().len(), 2);

        let workloads: Vec<serde_json::Value> = app.get("/api/v1/workloads?skip=1&limit=1").await.json();
        assert_eq!(workloads.len(), 1);
        assert!(workloads[0].get("mount_points").is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_delete_workload_cascades() {
        let (app, state) = create_test_app(create_test_config()).await;
        let scenario = seed_scenario(state.storage.as_ref()).await;

        app.delete(&format!("/api/v1/workloads/{}", scenario.destination.id))
            .await
            .assert_status(StatusCode::NO_CONTENT);

        app.get(&format!("/api/v1/targets/{}", scenario.target.id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
        app.delete(&format!("/api/v1/workloads/{}", scenario.destination.id))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
