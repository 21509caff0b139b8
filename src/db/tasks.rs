//! Task rows. Every state transition is a conditional UPDATE whose
//! `rows_affected` tells the caller whether it won.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{artifacts, now_str, parse_timestamp, DbPool};
use crate::error::AppError;
use crate::models::{Artifact, ProviderJobRef, Task, TaskResult};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaskRecord {
    pub id: String,
    pub project_id: String,
    pub task_type: String,
    pub status: String,
    pub progress: i64,
    pub provider: Option<String>,
    pub provider_job_id: Option<String>,
    pub payload: Option<String>,
    pub result: Option<String>,
    pub last_error: Option<String>,
    pub poll_attempts: i64,
    pub last_polled_at: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl TryFrom<TaskRecord> for Task {
    type Error = AppError;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let provider_ref = match (record.provider, record.provider_job_id) {
            (Some(provider), Some(job_id)) => Some(ProviderJobRef {
                provider: provider.parse()?,
                job_id,
            }),
            _ => None,
        };

        let payload = record
            .payload
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Internal(format!("task {} payload: {}", record.id, e)))?;

        let result = record
            .result
            .as_deref()
            .map(serde_json::from_str::<TaskResult>)
            .transpose()
            .map_err(|e| AppError::Internal(format!("task {} result: {}", record.id, e)))?;

        Ok(Task {
            project_id: record.project_id,
            task_type: record.task_type.parse()?,
            status: record.status.parse()?,
            percent: record.progress.clamp(0, 100) as u8,
            provider_ref,
            payload,
            result,
            last_error: record.last_error,
            poll_attempts: record.poll_attempts.max(0) as u32,
            last_polled_at: record.last_polled_at.as_deref().and_then(parse_timestamp),
            started_at: record.started_at.as_deref().and_then(parse_timestamp),
            completed_at: record.completed_at.as_deref().and_then(parse_timestamp),
            updated_at: parse_timestamp(&record.updated_at).unwrap_or_else(chrono::Utc::now),
            id: record.id,
        })
    }
}

const SELECT_TASK: &str = r#"
    SELECT id, project_id, task_type, status, progress, provider, provider_job_id,
           payload, result, last_error, poll_attempts, last_polled_at,
           started_at, completed_at, created_at, updated_at
    FROM tasks
"#;

pub async fn get_task(
    pool: &DbPool,
    project_id: &str,
    task_type: &str,
) -> Result<Option<TaskRecord>, sqlx::Error> {
    sqlx::query_as::<_, TaskRecord>(&format!("{SELECT_TASK} WHERE project_id = ? AND task_type = ?"))
        .bind(project_id)
        .bind(task_type)
        .fetch_optional(pool)
        .await
}

pub async fn get_task_by_id(pool: &DbPool, id: &str) -> Result<Option<TaskRecord>, sqlx::Error> {
    sqlx::query_as::<_, TaskRecord>(&format!("{SELECT_TASK} WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Resolves the owner of a provider job. Ids found inside a webhook payload
/// are never used for this.
pub async fn find_by_provider_ref(
    pool: &DbPool,
    provider: &str,
    provider_job_id: &str,
) -> Result<Option<TaskRecord>, sqlx::Error> {
    sqlx::query_as::<_, TaskRecord>(&format!(
        "{SELECT_TASK} WHERE provider = ? AND provider_job_id = ?"
    ))
    .bind(provider)
    .bind(provider_job_id)
    .fetch_optional(pool)
    .await
}

pub async fn list_for_project(pool: &DbPool, project_id: &str) -> Result<Vec<TaskRecord>, sqlx::Error> {
    sqlx::query_as::<_, TaskRecord>(&format!(
        "{SELECT_TASK} WHERE project_id = ? ORDER BY created_at, task_type"
    ))
    .bind(project_id)
    .fetch_all(pool)
    .await
}

/// Creates the task, or resets it when it is `pending` or `failed`, straight
/// into `processing`. Returns `None` when the existing task is processing or
/// completed; nothing is written then.
///
/// A reset from `failed` drops the previous provider job, result and error.
pub async fn accept_task(
    pool: &DbPool,
    project_id: &str,
    task_type: &str,
    payload: &str,
    percent: u8,
) -> Result<Option<TaskRecord>, sqlx::Error> {
    let now = now_str();

    sqlx::query_as::<_, TaskRecord>(
        r#"
        INSERT INTO tasks (
            id, project_id, task_type, status, progress, payload,
            poll_attempts, started_at, created_at, updated_at
        ) VALUES (?, ?, ?, 'processing', ?, ?, 0, ?, ?, ?)
        ON CONFLICT (project_id, task_type) DO UPDATE SET
            status = 'processing',
            progress = excluded.progress,
            payload = excluded.payload,
            provider = CASE WHEN tasks.status = 'failed' THEN NULL ELSE tasks.provider END,
            provider_job_id = CASE WHEN tasks.status = 'failed' THEN NULL ELSE tasks.provider_job_id END,
            result = NULL,
            last_error = NULL,
            poll_attempts = 0,
            last_polled_at = NULL,
            started_at = excluded.started_at,
            completed_at = NULL,
            updated_at = excluded.updated_at
        WHERE tasks.status IN ('pending', 'failed')
        RETURNING id, project_id, task_type, status, progress, provider, provider_job_id,
                  payload, result, last_error, poll_attempts, last_polled_at,
                  started_at, completed_at, created_at, updated_at
        "#,
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(project_id)
    .bind(task_type)
    .bind(percent as i64)
    .bind(payload)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .fetch_optional(pool)
    .await
}

/// Raises the percent of a processing task. Lower or equal values are no-ops.
pub async fn set_progress(pool: &DbPool, id: &str, percent: u8) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks SET progress = ?, updated_at = ?
        WHERE id = ? AND status = 'processing' AND progress < ?
        "#,
    )
    .bind(percent as i64)
    .bind(now_str())
    .bind(id)
    .bind(percent as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Records the provider job once. A second writer finds the ref already set
/// and changes nothing.
pub async fn set_provider_ref(
    pool: &DbPool,
    id: &str,
    provider: &str,
    provider_job_id: &str,
    percent: u8,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks SET
            provider = ?,
            provider_job_id = ?,
            progress = MAX(progress, ?),
            updated_at = ?
        WHERE id = ? AND status = 'processing' AND provider_job_id IS NULL
        "#,
    )
    .bind(provider)
    .bind(provider_job_id)
    .bind(percent as i64)
    .bind(now_str())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Back to `pending`, percent 0, no error: the submission never reached the
/// provider and the user may start again.
pub async fn revert_to_pending(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks SET
            status = 'pending',
            progress = 0,
            started_at = NULL,
            updated_at = ?
        WHERE id = ? AND status = 'processing' AND provider_job_id IS NULL
        "#,
    )
    .bind(now_str())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// The only transition to `completed`. Artifacts are written in the same
/// transaction, so they exist exactly when the completion won.
pub async fn complete_task(
    pool: &DbPool,
    id: &str,
    result_json: &str,
    artifacts: &[Artifact],
) -> Result<bool, sqlx::Error> {
    let now = now_str();
    let mut tx = pool.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE tasks SET
            status = 'completed',
            progress = 100,
            result = ?,
            last_error = NULL,
            completed_at = ?,
            updated_at = ?
        WHERE id = ? AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(result_json)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    artifacts::insert_all(&mut tx, id, artifacts).await?;
    tx.commit().await?;

    Ok(true)
}

pub async fn fail_task(pool: &DbPool, id: &str, error: &str) -> Result<bool, sqlx::Error> {
    let now = now_str();

    let result = sqlx::query(
        r#"
        UPDATE tasks SET
            status = 'failed',
            last_error = ?,
            completed_at = ?,
            updated_at = ?
        WHERE id = ? AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(error)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Counts one provider status query. Leaves `updated_at` alone: it tracks
/// provider activity, not ours.
pub async fn record_poll(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE tasks SET poll_attempts = poll_attempts + 1, last_polled_at = ?
        WHERE id = ? AND status = 'processing'
        "#,
    )
    .bind(now_str())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Processing tasks that can be polled (a provider job, or a fan-out parent)
/// and have seen no update since `cutoff`.
pub async fn due_for_poll(pool: &DbPool, cutoff: &str) -> Result<Vec<TaskRecord>, sqlx::Error> {
    sqlx::query_as::<_, TaskRecord>(&format!(
        r#"{SELECT_TASK}
        WHERE status = 'processing'
          AND (provider_job_id IS NOT NULL OR task_type = 'thumbnail-batch')
          AND updated_at < ?
        ORDER BY updated_at
        "#
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await
}

/// Accepted tasks whose submission never recorded a provider job. A batch
/// parent only counts while none of its items were created.
pub async fn stale_submissions(pool: &DbPool, cutoff: &str) -> Result<Vec<TaskRecord>, sqlx::Error> {
    sqlx::query_as::<_, TaskRecord>(&format!(
        r#"{SELECT_TASK}
        WHERE status = 'processing'
          AND provider_job_id IS NULL
          AND updated_at < ?
          AND (task_type != 'thumbnail-batch'
               OR NOT EXISTS (SELECT 1 FROM batch_items b WHERE b.task_id = tasks.id))
        ORDER BY updated_at
        "#
    ))
    .bind(cutoff)
    .fetch_all(pool)
    .await
}
