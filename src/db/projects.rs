use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{now_str, DbPool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProjectRecord {
    pub id: String,
    pub owner_id: String,
    pub source_media_url: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Registers a project. Returns false when the id is already taken.
pub async fn create_project(
    pool: &DbPool,
    id: &str,
    owner_id: &str,
    source_media_url: &str,
) -> Result<bool, sqlx::Error> {
    let now = now_str();

    let result = sqlx::query(
        r#"
        INSERT INTO projects (id, owner_id, source_media_url, status, created_at, updated_at)
        VALUES (?, ?, ?, 'draft', ?, ?)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(id)
    .bind(owner_id)
    .bind(source_media_url)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_project(pool: &DbPool, id: &str) -> Result<Option<ProjectRecord>, sqlx::Error> {
    sqlx::query_as::<_, ProjectRecord>(
        r#"
        SELECT id, owner_id, source_media_url, status, created_at, updated_at
        FROM projects WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Deletes the project; tasks, batch items and artifacts go with it.
pub async fn delete_project(pool: &DbPool, id: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Recomputes the project status from its tasks: no tasks is `draft`, any
/// pending or processing task is `processing`, then any completed task is
/// `completed`, otherwise `failed`.
pub async fn refresh_status(pool: &DbPool, id: &str) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        UPDATE projects SET
            status = (
                SELECT CASE
                    WHEN COUNT(*) = 0 THEN 'draft'
                    WHEN SUM(t.status IN ('pending', 'processing')) > 0 THEN 'processing'
                    WHEN SUM(t.status = 'completed') > 0 THEN 'completed'
                    ELSE 'failed'
                END
                FROM tasks t WHERE t.project_id = projects.id
            ),
            updated_at = ?
        WHERE id = ?
        RETURNING status
        "#,
    )
    .bind(now_str())
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.0))
}
