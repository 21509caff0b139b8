use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

use super::{now_str, DbPool};
use crate::models::Artifact;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ArtifactRecord {
    pub id: i64,
    pub task_id: String,
    pub position: i64,
    pub kind: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub metadata: Option<String>,
    pub created_at: String,
}

impl ArtifactRecord {
    /// Rows with an unknown kind are skipped by callers.
    pub fn to_artifact(&self) -> Option<Artifact> {
        let kind = serde_json::from_value(serde_json::Value::String(self.kind.clone())).ok()?;
        let metadata = self
            .metadata
            .as_deref()
            .and_then(|m| serde_json::from_str(m).ok())
            .unwrap_or(serde_json::Value::Null);

        Some(Artifact {
            kind,
            url: self.url.clone(),
            title: self.title.clone(),
            metadata,
        })
    }
}

/// Called inside the completion transaction.
pub async fn insert_all(
    conn: &mut SqliteConnection,
    task_id: &str,
    artifacts: &[Artifact],
) -> Result<(), sqlx::Error> {
    let now = now_str();

    for (position, artifact) in artifacts.iter().enumerate() {
        let metadata = if artifact.metadata.is_null() {
            None
        } else {
            Some(artifact.metadata.to_string())
        };

        sqlx::query(
            r#"
            INSERT INTO artifacts (task_id, position, kind, url, title, metadata, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(task_id)
        .bind(position as i64)
        .bind(artifact.kind.as_str())
        .bind(&artifact.url)
        .bind(&artifact.title)
        .bind(metadata)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

pub async fn list_for_task(pool: &DbPool, task_id: &str) -> Result<Vec<ArtifactRecord>, sqlx::Error> {
    sqlx::query_as::<_, ArtifactRecord>(
        r#"
        SELECT id, task_id, position, kind, url, title, metadata, created_at
        FROM artifacts WHERE task_id = ? ORDER BY position
        "#,
    )
    .bind(task_id)
    .fetch_all(pool)
    .await
}

pub async fn list_for_project(pool: &DbPool, project_id: &str) -> Result<Vec<ArtifactRecord>, sqlx::Error> {
    sqlx::query_as::<_, ArtifactRecord>(
        r#"
        SELECT a.id, a.task_id, a.position, a.kind, a.url, a.title, a.metadata, a.created_at
        FROM artifacts a
        JOIN tasks t ON t.id = a.task_id
        WHERE t.project_id = ?
        ORDER BY t.created_at, t.task_type, a.position
        "#,
    )
    .bind(project_id)
    .fetch_all(pool)
    .await
}
