//! Task routes: start, poll, project progress view and SSE stream.

mod crud;
mod stream;

use axum::{
    routing::{get, post},
    Router,
};

use crate::services::Orchestrator;

// Re-export public items (including utoipa path types)
pub use crud::*;
pub use stream::*;

pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/api/v1/tasks/:project_id", get(list_project_tasks))
        .route("/api/v1/tasks/:project_id/:task_type", post(start_task))
        .route("/api/v1/tasks/:project_id/:task_type", get(get_task))
        .route("/api/v1/tasks/:project_id/:task_type/events", get(task_progress_stream))
        .with_state(orchestrator)
}
