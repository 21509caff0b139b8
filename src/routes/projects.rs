//! Project registration, used by the upload service once a video is stored.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use uuid::Uuid;

use crate::db::{artifacts, projects};
use crate::error::{AppError, Result};
use crate::models::{validate_url, AuthInfo, CreateProjectRequest, ProjectResponse};
use crate::services::{ensure_project_owner, Orchestrator};

pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/api/v1/projects", post(create_project))
        .route("/api/v1/projects/:id", get(get_project).delete(delete_project))
        .with_state(orchestrator)
}

async fn project_response(state: &Orchestrator, project: projects::ProjectRecord) -> Result<ProjectResponse> {
    let max_attempts = state.config.orchestration.max_poll_attempts;

    let tasks = state
        .store
        .list_for_project(&project.id)
        .await?
        .iter()
        .map(|t| t.snapshot(max_attempts))
        .collect();

    let artifacts = artifacts::list_for_project(state.store.db(), &project.id)
        .await?
        .iter()
        .filter_map(|a| a.to_artifact())
        .collect();

    Ok(ProjectResponse {
        status: project.status.parse()?,
        id: project.id,
        owner_id: project.owner_id,
        source_media_url: project.source_media_url,
        tasks,
        artifacts,
        created_at: project.created_at,
        updated_at: project.updated_at,
    })
}

/// Register a project
#[utoipa::path(
    post,
    path = "/api/v1/projects",
    tag = "Projects",
    request_body = CreateProjectRequest,
    responses(
        (status = 201, description = "Project created", body = ProjectResponse),
        (status = 400, description = "Invalid URL or id already taken"),
    )
)]
pub async fn create_project(
    State(state): State<Orchestrator>,
    Extension(auth): Extension<AuthInfo>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectResponse>)> {
    validate_url(&request.source_media_url)?;

    let id = match request.id.map(|id| id.trim().to_string()) {
        Some(id) if id.is_empty() => {
            return Err(AppError::Validation("project id must not be empty".to_string()));
        }
        Some(id) => id,
        None => Uuid::new_v4().to_string(),
    };

    let created =
        projects::create_project(state.store.db(), &id, &auth.user_id, &request.source_media_url).await?;
    if !created {
        return Err(AppError::Validation(format!("project {} already exists", id)));
    }

    tracing::info!(project_id = %id, user_id = %auth.user_id, "Project registered");

    let project = ensure_project_owner(state.store.db(), &id, &auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(project_response(&state, project).await?)))
}

/// Project details with tasks and artifacts
#[utoipa::path(
    get,
    path = "/api/v1/projects/{id}",
    tag = "Projects",
    params(
        ("id" = String, Path, description = "Project id")
    ),
    responses(
        (status = 200, description = "Project", body = ProjectResponse),
        (status = 403, description = "Project owned by another user"),
        (status = 404, description = "Project not found"),
    )
)]
pub async fn get_project(
    State(state): State<Orchestrator>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<Json<ProjectResponse>> {
    let project = ensure_project_owner(state.store.db(), &id, &auth.user_id).await?;
    Ok(Json(project_response(&state, project).await?))
}

/// Delete a project
///
/// Tasks, batch items and artifacts are deleted with it. Late provider
/// callbacks for its jobs are then ignored.
#[utoipa::path(
    delete,
    path = "/api/v1/projects/{id}",
    tag = "Projects",
    params(
        ("id" = String, Path, description = "Project id")
    ),
    responses(
        (status = 204, description = "Project deleted"),
        (status = 403, description = "Project owned by another user"),
        (status = 404, description = "Project not found"),
    )
)]
pub async fn delete_project(
    State(state): State<Orchestrator>,
    Extension(auth): Extension<AuthInfo>,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    ensure_project_owner(state.store.db(), &id, &auth.user_id).await?;

    if !projects::delete_project(state.store.db(), &id).await? {
        return Err(AppError::ProjectNotFound(id));
    }

    tracing::info!(project_id = %id, "Project deleted");
    Ok(StatusCode::NO_CONTENT)
}
