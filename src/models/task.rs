use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;
use crate::providers::ProviderKind;

/// Kind of orchestrated work. One task per (project, task type).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    Transcription,
    Clips,
    PersonaTraining,
    ThumbnailBatch,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::Transcription,
        TaskType::Clips,
        TaskType::PersonaTraining,
        TaskType::ThumbnailBatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Transcription => "transcription",
            TaskType::Clips => "clips",
            TaskType::PersonaTraining => "persona-training",
            TaskType::ThumbnailBatch => "thumbnail-batch",
        }
    }

    /// Provider that performs this kind of task.
    pub fn provider(&self) -> ProviderKind {
        match self {
            TaskType::Transcription => ProviderKind::Transcription,
            TaskType::Clips => ProviderKind::Clips,
            TaskType::PersonaTraining => ProviderKind::Persona,
            TaskType::ThumbnailBatch => ProviderKind::Images,
        }
    }

    /// Fan-out tasks are tracked item by item.
    pub fn is_batch(&self) -> bool {
        matches!(self, TaskType::ThumbnailBatch)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("unknown task type '{}'", s)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(AppError::Internal(format!("unknown task status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Draft,
    Processing,
    Completed,
    Failed,
}

impl std::str::FromStr for ProjectStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ProjectStatus::Draft),
            "processing" => Ok(ProjectStatus::Processing),
            "completed" => Ok(ProjectStatus::Completed),
            "failed" => Ok(ProjectStatus::Failed),
            other => Err(AppError::Internal(format!("unknown project status '{}'", other))),
        }
    }
}

/// Identifier issued by a provider on job creation. Idempotency key of a
/// task (or batch item) and argument of status polls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderJobRef {
    pub provider: ProviderKind,
    pub job_id: String,
}

impl ProviderJobRef {
    pub fn new(provider: ProviderKind, job_id: impl Into<String>) -> Self {
        Self {
            provider,
            job_id: job_id.into(),
        }
    }
}

impl std::fmt::Display for ProviderJobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.job_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Clip,
    Transcript,
    PersonaWeights,
    Thumbnail,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Clip => "clip",
            ArtifactKind::Transcript => "transcript",
            ArtifactKind::PersonaWeights => "persona-weights",
            ArtifactKind::Thumbnail => "thumbnail",
        }
    }
}

/// An asset produced by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Artifact {
    pub kind: ArtifactKind,
    /// Absent for inline results such as transcript text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: Some(url.into()),
            title: None,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Outcome of one item of a batch task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BatchItemOutcome {
    pub index: u32,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Normalized result stored on a completed task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TaskResult {
    pub artifacts: Vec<Artifact>,
    /// Provider data that is not an asset (transcript text, model version).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub details: Option<serde_json::Value>,
    /// Per-item outcomes, batch tasks only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<BatchItemOutcome>,
}

impl TaskResult {
    pub fn with_artifacts(artifacts: Vec<Artifact>) -> Self {
        Self {
            artifacts,
            ..Default::default()
        }
    }
}

/// Progress event broadcast to SSE subscribers
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ProgressUpdate {
    pub project_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[schema(value_type = String)]
    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(task: &Task, message: Option<String>) -> Self {
        Self {
            project_id: task.project_id.clone(),
            task_type: task.task_type,
            status: task.status,
            percent: task.percent,
            message,
            timestamp: Utc::now(),
        }
    }
}

/// A task as seen by the orchestration core.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub project_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub percent: u8,
    pub provider_ref: Option<ProviderJobRef>,
    pub payload: Option<serde_json::Value>,
    pub result: Option<TaskResult>,
    pub last_error: Option<String>,
    pub poll_attempts: u32,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A task keeps processing past the poll cap; it is only reported as
    /// slow, never failed, on that account.
    pub fn is_stalled(&self, max_poll_attempts: u32) -> bool {
        self.status == TaskStatus::Processing && self.poll_attempts >= max_poll_attempts
    }

    pub fn snapshot(&self, max_poll_attempts: u32) -> TaskSnapshot {
        let stalled = self.is_stalled(max_poll_attempts);
        let message = match self.status {
            TaskStatus::Processing if stalled => {
                Some("Taking longer than expected, still working on it".to_string())
            }
            TaskStatus::Processing if self.provider_ref.is_none() && !self.task_type.is_batch() => {
                Some("Submitting to provider".to_string())
            }
            TaskStatus::Pending => Some("Not started, submit again to retry".to_string()),
            _ => None,
        };

        TaskSnapshot {
            project_id: self.project_id.clone(),
            task_type: self.task_type,
            status: self.status,
            percent: self.percent,
            error: self.last_error.clone(),
            result: self.result.clone(),
            provider_job_id: self.provider_ref.as_ref().map(|r| r.job_id.clone()),
            stalled,
            message,
            started_at: self.started_at,
            completed_at: self.completed_at,
            updated_at: self.updated_at,
        }
    }
}

/// Client-facing view of a task.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TaskSnapshot {
    pub project_id: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_job_id: Option<String>,
    pub stalled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[schema(value_type = Option<String>)]
    pub started_at: Option<DateTime<Utc>>,
    #[schema(value_type = Option<String>)]
    pub completed_at: Option<DateTime<Utc>>,
    #[schema(value_type = String)]
    pub updated_at: DateTime<Utc>,
}
