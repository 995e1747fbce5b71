use crate::AppState;
use crate::api::models::tasks::TaskResponse;
use crate::errors::{Error, Result};
use crate::tasks::{JobHandle, JobQueue};
use crate::types::{TaskId, abbrev_uuid};
use axum::{
    Json,
    extract::{Path, State},
};

fn find_task(state: &AppState, task_id: TaskId) -> Result<JobHandle> {
    state.queue.get(task_id).ok_or_else(|| Error::NotFound {
        resource: "Task".to_string(),
        id: task_id.to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/tasks/{task_id}",
    tag = "tasks",
    summary = "Get task",
    description = "Status of a background task. Finished tasks are kept for the configured retention period.",
    responses(
        (status = 200, description = "Task status", body = TaskResponse),
        (status = 404, description = "Task not found"),
    ),
    params(
        ("task_id" = uuid::Uuid, Path, description = "Task ID")
    )
)]
#[tracing::instrument(skip_all, fields(task_id = %abbrev_uuid(&task_id)))]
pub async fn get_task(State(state): State<AppState>, Path(task_id): Path<TaskId>) -> Result<Json<TaskResponse>> {
    let handle = find_task(&state, task_id)?;
    Ok(Json(TaskResponse::from(&handle)))
}

#[utoipa::path(
    post,
    path = "/tasks/{task_id}/cancel",
    tag = "tasks",
    summary = "Cancel task",
    description = "Cancels a task that is queued or waiting to retry. A task whose attempt is executing cannot be cancelled.",
    responses(
        (status = 200, description = "Task cancelled", body = TaskResponse),
        (status = 404, description = "Task not found"),
        (status = 409, description = "Task is executing or already finished"),
    ),
    params(
        ("task_id" = uuid::Uuid, Path, description = "Task ID")
    )
)]
#[tracing::instrument(skip_all, fields(task_id = %abbrev_uuid(&task_id)))]
pub async fn cancel_task(State(state): State<AppState>, Path(task_id): Path<TaskId>) -> Result<Json<TaskResponse>> {
    let handle = find_task(&state, task_id)?;
    if !handle.cancel() {
        return Err(Error::Conflict {
            message: format!("Task {task_id} is executing or already finished"),
        });
    }
    Ok(Json(TaskResponse::from(&handle)))
}
