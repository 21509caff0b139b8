//! Durable task progress store.
//!
//! Wraps the conditional writes of `db::tasks`, broadcasts every effective
//! write as a [`ProgressUpdate`] and keeps the project status in step with
//! its tasks. The broadcast is advisory: the database stays authoritative.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::db::{self, batches, projects, tasks as db_tasks, DbPool};
use crate::error::{AppError, Result};
use crate::models::{ProgressUpdate, ProviderJobRef, Task, TaskPayload, TaskResult, TaskStatus, TaskType};
use crate::providers::{JobState, ProviderStatus};

const PROGRESS_CHANNEL_CAPACITY: usize = 100;

/// Highest percent a task can show before it is completed.
const MAX_PROCESSING_PERCENT: u8 = 99;

pub type ProgressSender = broadcast::Sender<ProgressUpdate>;

#[derive(Clone)]
pub struct TaskStore {
    db: DbPool,
    progress_tx: ProgressSender,
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("subscribers", &self.progress_tx.receiver_count())
            .finish()
    }
}

fn to_task(record: db_tasks::TaskRecord) -> Result<Task> {
    Task::try_from(record)
}

impl TaskStore {
    pub fn new(db: DbPool) -> Self {
        let (progress_tx, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self { db, progress_tx }
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.progress_tx.subscribe()
    }

    fn publish(&self, task: &Task, status: TaskStatus, percent: u8, message: Option<String>) {
        let mut update = ProgressUpdate::new(task, message);
        update.status = status;
        update.percent = percent;
        // No receiver just means no client is listening.
        let _ = self.progress_tx.send(update);
    }

    async fn refresh_project(&self, project_id: &str) {
        if let Err(e) = projects::refresh_status(&self.db, project_id).await {
            tracing::error!(project_id = %project_id, "Failed to refresh project status: {}", e);
        }
    }

    pub async fn get(&self, project_id: &str, task_type: TaskType) -> Result<Option<Task>> {
        db_tasks::get_task(&self.db, project_id, task_type.as_str())
            .await?
            .map(to_task)
            .transpose()
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Option<Task>> {
        db_tasks::get_task_by_id(&self.db, id).await?.map(to_task).transpose()
    }

    pub async fn list_for_project(&self, project_id: &str) -> Result<Vec<Task>> {
        db_tasks::list_for_project(&self.db, project_id)
            .await?
            .into_iter()
            .map(to_task)
            .collect()
    }

    pub async fn find_by_provider_ref(&self, job: &ProviderJobRef) -> Result<Option<Task>> {
        db_tasks::find_by_provider_ref(&self.db, job.provider.as_str(), &job.job_id)
            .await?
            .map(to_task)
            .transpose()
    }

    /// Moves the task to `processing` at `percent` unless it is already
    /// processing or completed. `None` means someone else holds the task.
    pub async fn accept(&self, project_id: &str, payload: &TaskPayload, percent: u8) -> Result<Option<Task>> {
        let task_type = payload.task_type();
        let record = db_tasks::accept_task(
            &self.db,
            project_id,
            task_type.as_str(),
            &payload.to_value().to_string(),
            percent,
        )
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let task = to_task(record)?;
        tracing::info!(project_id = %project_id, task_type = %task_type, percent, "Task accepted");
        self.publish(&task, TaskStatus::Processing, task.percent, Some("Task accepted".to_string()));
        self.refresh_project(project_id).await;

        Ok(Some(task))
    }

    /// Raises the percent. Lower values and non-processing tasks are no-ops.
    pub async fn set_progress(&self, task: &Task, percent: u8) -> Result<bool> {
        let percent = percent.min(MAX_PROCESSING_PERCENT);
        let applied = db_tasks::set_progress(&self.db, &task.id, percent).await?;
        if applied {
            self.publish(task, TaskStatus::Processing, percent, None);
        }
        Ok(applied)
    }

    pub async fn set_provider_ref(&self, task: &Task, job: &ProviderJobRef, percent: u8) -> Result<bool> {
        let applied =
            db_tasks::set_provider_ref(&self.db, &task.id, job.provider.as_str(), &job.job_id, percent).await?;

        if applied {
            tracing::info!(
                project_id = %task.project_id,
                task_type = %task.task_type,
                provider_job_id = %job.job_id,
                "Provider job recorded"
            );
            self.publish(
                task,
                TaskStatus::Processing,
                percent.max(task.percent),
                Some("Submitted to provider".to_string()),
            );
        }
        Ok(applied)
    }

    pub async fn revert_to_pending(&self, task: &Task, reason: &str) -> Result<bool> {
        let applied = db_tasks::revert_to_pending(&self.db, &task.id).await?;
        if applied {
            tracing::warn!(
                project_id = %task.project_id,
                task_type = %task.task_type,
                "Provider unavailable, task back to pending: {}",
                reason
            );
            self.publish(task, TaskStatus::Pending, 0, Some("Provider unavailable, try again".to_string()));
            self.refresh_project(&task.project_id).await;
        }
        Ok(applied)
    }

    /// Completes the task with its artifacts. Effective at most once; a later
    /// call never touches the stored result.
    pub async fn set_result(&self, task: &Task, result: &TaskResult) -> Result<bool> {
        let result_json = serde_json::to_string(result)
            .map_err(|e| AppError::Internal(format!("serialize task result: {}", e)))?;

        let applied = db_tasks::complete_task(&self.db, &task.id, &result_json, &result.artifacts).await?;

        if applied {
            tracing::info!(
                project_id = %task.project_id,
                task_type = %task.task_type,
                provider_job_id = ?task.provider_ref.as_ref().map(|r| r.job_id.as_str()),
                artifacts = result.artifacts.len(),
                "Task completed"
            );
            self.publish(task, TaskStatus::Completed, 100, None);
            self.refresh_project(&task.project_id).await;
        }
        Ok(applied)
    }

    /// Fails the task. Effective at most once.
    pub async fn set_failed(&self, task: &Task, error: &str) -> Result<bool> {
        let applied = db_tasks::fail_task(&self.db, &task.id, error).await?;

        if applied {
            tracing::warn!(
                project_id = %task.project_id,
                task_type = %task.task_type,
                provider_job_id = ?task.provider_ref.as_ref().map(|r| r.job_id.as_str()),
                "Task failed: {}",
                error
            );
            // The caller's snapshot may predate a later progress hint.
            let percent = match self.get_by_id(&task.id).await {
                Ok(Some(stored)) => stored.percent,
                _ => task.percent,
            };
            self.publish(task, TaskStatus::Failed, percent, Some(error.to_string()));
            self.refresh_project(&task.project_id).await;
        }
        Ok(applied)
    }

    pub async fn record_poll(&self, task: &Task) -> Result<bool> {
        Ok(db_tasks::record_poll(&self.db, &task.id).await?)
    }

    /// Accepted tasks that never recorded a provider job and have not moved
    /// since `idle_since`.
    pub async fn stale_submissions(&self, idle_since: DateTime<Utc>) -> Result<Vec<Task>> {
        db_tasks::stale_submissions(&self.db, &db::timestamp(idle_since))
            .await?
            .into_iter()
            .map(to_task)
            .collect()
    }

    pub async fn due_for_poll(&self, idle_since: DateTime<Utc>) -> Result<Vec<Task>> {
        db_tasks::due_for_poll(&self.db, &db::timestamp(idle_since))
            .await?
            .into_iter()
            .map(to_task)
            .collect()
    }

    /// Applies a provider status to a single-job task. Webhooks and polls both
    /// end here, so a duplicate or out-of-order status changes nothing.
    pub async fn apply_status(&self, task: &Task, status: &ProviderStatus) -> Result<bool> {
        match status.state {
            JobState::Ready => match &status.result {
                Some(result) => self.set_result(task, result).await,
                None => Ok(false),
            },
            JobState::Failed => {
                let reason = status.error.as_deref().unwrap_or("provider reported a failure");
                self.set_failed(task, reason).await
            }
            JobState::Processing => match status.progress_hint {
                Some(hint) if hint > task.percent => self.set_progress(task, hint).await,
                _ => Ok(false),
            },
        }
    }

    pub async fn batch_items(&self, task: &Task) -> Result<Vec<batches::BatchItemRecord>> {
        Ok(batches::get_items(&self.db, &task.id).await?)
    }
}
