use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};

use crate::error::{AppError, Result};
use crate::models::{AuthInfo, ProjectTasksResponse, StartTaskResponse, TaskSnapshot, TaskType};
use crate::services::{ensure_project_owner, Orchestrator};

/// An empty body means "use the defaults".
fn parse_body(body: &Bytes) -> Result<serde_json::Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| AppError::Validation(format!("invalid JSON body: {}", e)))
}

/// Start a task
///
/// Returns 202 when this call moved the task to processing. A task that is
/// already processing or completed is returned as is with 200 and
/// `already_active`; no provider job is created in that case.
#[utoipa::path(
    post,
    path = "/api/v1/tasks/{project_id}/{task_type}",
    tag = "Tasks",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("task_type" = String, Path, description = "transcription, clips, persona-training or thumbnail-batch"),
    ),
    request_body(content = serde_json::Value, description = "Task options, shape depends on the task type"),
    responses(
        (status = 202, description = "Task accepted", body = StartTaskResponse),
        (status = 200, description = "Task already in progress or completed", body = StartTaskResponse),
        (status = 400, description = "Invalid options or unavailable task type"),
        (status = 403, description = "Project owned by another user"),
        (status = 404, description = "Project not found"),
    )
)]
pub async fn start_task(
    State(state): State<Orchestrator>,
    Extension(auth): Extension<AuthInfo>,
    Path((project_id, task_type)): Path<(String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<StartTaskResponse>)> {
    let task_type: TaskType = task_type.parse()?;
    let payload = parse_body(&body)?;

    let outcome = state
        .dispatcher
        .start_task(&auth, &project_id, task_type, payload)
        .await?;

    let snapshot = outcome.task().snapshot(state.config.orchestration.max_poll_attempts);
    let accepted = outcome.is_accepted();

    let (status, message) = if accepted {
        (StatusCode::ACCEPTED, "Task accepted, submitting to provider")
    } else {
        (StatusCode::OK, "Task already in progress or completed")
    };

    Ok((
        status,
        Json(StartTaskResponse {
            accepted,
            already_active: !accepted,
            message: message.to_string(),
            task: snapshot,
        }),
    ))
}

/// Task status
///
/// Refreshes the task from its provider when the poll interval allows it.
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{project_id}/{task_type}",
    tag = "Tasks",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("task_type" = String, Path, description = "Task type"),
    ),
    responses(
        (status = 200, description = "Task snapshot", body = TaskSnapshot),
        (status = 404, description = "Project or task not found"),
    )
)]
pub async fn get_task(
    State(state): State<Orchestrator>,
    Extension(auth): Extension<AuthInfo>,
    Path((project_id, task_type)): Path<(String, String)>,
) -> Result<Json<TaskSnapshot>> {
    let task_type: TaskType = task_type.parse()?;

    let task = state.reconciler.poll_once(&auth, &project_id, task_type).await?;

    Ok(Json(task.snapshot(state.config.orchestration.max_poll_attempts)))
}

/// Every task of a project
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{project_id}",
    tag = "Tasks",
    params(
        ("project_id" = String, Path, description = "Project id"),
    ),
    responses(
        (status = 200, description = "Project progress", body = ProjectTasksResponse),
        (status = 404, description = "Project not found"),
    )
)]
pub async fn list_project_tasks(
    State(state): State<Orchestrator>,
    Extension(auth): Extension<AuthInfo>,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectTasksResponse>> {
    let project = ensure_project_owner(state.store.db(), &project_id, &auth.user_id).await?;
    let max_attempts = state.config.orchestration.max_poll_attempts;

    let tasks = state
        .store
        .list_for_project(&project_id)
        .await?
        .iter()
        .map(|t| t.snapshot(max_attempts))
        .collect();

    Ok(Json(ProjectTasksResponse {
        project_id: project.id,
        status: project.status.parse()?,
        tasks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_body_means_defaults() {
        assert_eq!(parse_body(&Bytes::new()).unwrap(), serde_json::Value::Null);
        assert_eq!(parse_body(&Bytes::from_static(b" \n")).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn invalid_json_is_a_validation_error() {
        let err = parse_body(&Bytes::from_static(b"{not json")).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
