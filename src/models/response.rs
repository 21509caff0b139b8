use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{Artifact, ProjectStatus, TaskSnapshot};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// API status
    pub status: String,
    pub version: String,
    /// Providers registered at startup (those with an API key)
    pub providers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartTaskResponse {
    /// True when this call moved the task to processing
    pub accepted: bool,
    /// True when the task was already processing or completed
    pub already_active: bool,
    pub message: String,
    pub task: TaskSnapshot,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectTasksResponse {
    pub project_id: String,
    pub status: ProjectStatus,
    pub tasks: Vec<TaskSnapshot>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectResponse {
    pub id: String,
    pub owner_id: String,
    pub source_media_url: String,
    pub status: ProjectStatus,
    pub tasks: Vec<TaskSnapshot>,
    /// Artifacts of completed tasks, in task then position order
    pub artifacts: Vec<Artifact>,
    pub created_at: String,
    pub updated_at: String,
}

/// How a webhook delivery was handled. Returned with HTTP 200 in all cases.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    /// The delivery changed stored state
    Applied,
    /// Known job, but nothing new (duplicate or late delivery)
    Unchanged,
    /// No task or batch item owns the provider job id
    Ignored,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

impl WebhookAck {
    pub fn new(outcome: WebhookOutcome) -> Self {
        Self {
            received: true,
            outcome,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
}
