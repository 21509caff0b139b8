//! Per-item rows of fan-out tasks.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::{now_str, DbPool};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchItemRecord {
    pub task_id: String,
    pub item_index: i64,
    /// Item request as JSON
    pub input: String,
    pub status: String,
    pub provider: Option<String>,
    pub provider_job_id: Option<String>,
    pub output_url: Option<String>,
    pub error: Option<String>,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct BatchCounts {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
}

const SELECT_ITEM: &str = r#"
    SELECT task_id, item_index, input, status, provider, provider_job_id,
           output_url, error, updated_at
    FROM batch_items
"#;

/// Replaces the items of `task_id` with fresh pending ones.
pub async fn insert_items(pool: &DbPool, task_id: &str, inputs: &[String]) -> Result<(), sqlx::Error> {
    let now = now_str();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM batch_items WHERE task_id = ?")
        .bind(task_id)
        .execute(&mut *tx)
        .await?;

    for (index, input) in inputs.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO batch_items (task_id, item_index, input, status, updated_at)
            VALUES (?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(task_id)
        .bind(index as i64)
        .bind(input)
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

pub async fn get_items(pool: &DbPool, task_id: &str) -> Result<Vec<BatchItemRecord>, sqlx::Error> {
    sqlx::query_as::<_, BatchItemRecord>(&format!("{SELECT_ITEM} WHERE task_id = ? ORDER BY item_index"))
        .bind(task_id)
        .fetch_all(pool)
        .await
}

pub async fn find_item_by_provider_ref(
    pool: &DbPool,
    provider: &str,
    provider_job_id: &str,
) -> Result<Option<BatchItemRecord>, sqlx::Error> {
    sqlx::query_as::<_, BatchItemRecord>(&format!(
        "{SELECT_ITEM} WHERE provider = ? AND provider_job_id = ?"
    ))
    .bind(provider)
    .bind(provider_job_id)
    .fetch_optional(pool)
    .await
}

/// Moves a pending item to processing with its provider job. Written once.
pub async fn set_item_provider_ref(
    pool: &DbPool,
    task_id: &str,
    index: u32,
    provider: &str,
    provider_job_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE batch_items SET
            provider = ?,
            provider_job_id = ?,
            status = 'processing',
            updated_at = ?
        WHERE task_id = ? AND item_index = ? AND provider_job_id IS NULL AND status = 'pending'
        "#,
    )
    .bind(provider)
    .bind(provider_job_id)
    .bind(now_str())
    .bind(task_id)
    .bind(index as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Terminal write of one item, effective only while it is not terminal.
pub async fn record_item_result(
    pool: &DbPool,
    task_id: &str,
    index: u32,
    status: &str,
    output_url: Option<&str>,
    error: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE batch_items SET
            status = ?,
            output_url = ?,
            error = ?,
            updated_at = ?
        WHERE task_id = ? AND item_index = ? AND status NOT IN ('completed', 'failed')
        "#,
    )
    .bind(status)
    .bind(output_url)
    .bind(error)
    .bind(now_str())
    .bind(task_id)
    .bind(index as i64)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn counts(pool: &DbPool, task_id: &str) -> Result<BatchCounts, sqlx::Error> {
    sqlx::query_as::<_, BatchCounts>(
        r#"
        SELECT COUNT(*) AS total,
               COALESCE(SUM(status = 'completed'), 0) AS completed,
               COALESCE(SUM(status = 'failed'), 0) AS failed
        FROM batch_items WHERE task_id = ?
        "#,
    )
    .bind(task_id)
    .fetch_one(pool)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{init_memory_db, projects, tasks};

    async fn setup() -> (DbPool, String) {
        let pool = init_memory_db().await.unwrap();
        projects::create_project(&pool, "P1", "u1", "https://cdn.example.com/a.mp4").await.unwrap();
        let task = tasks::accept_task(&pool, "P1", "thumbnail-batch", "{}", 5).await.unwrap().unwrap();
        (pool, task.id)
    }

    #[tokio::test]
    async fn items_are_replaced_on_reinsert() {
        let (pool, task_id) = setup().await;
        insert_items(&pool, &task_id, &["a".into(), "b".into(), "c".into()]).await.unwrap();
        insert_items(&pool, &task_id, &["x".into(), "y".into()]).await.unwrap();

        let items = get_items(&pool, &task_id).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].input, "y");
        assert_eq!(items[1].status, "pending");
    }

    #[tokio::test]
    async fn item_results_are_final() {
        let (pool, task_id) = setup().await;
        insert_items(&pool, &task_id, &["a".into(), "b".into()]).await.unwrap();
        assert!(set_item_provider_ref(&pool, &task_id, 0, "images", "pr-1").await.unwrap());
        assert!(!set_item_provider_ref(&pool, &task_id, 0, "images", "pr-2").await.unwrap());

        let item = find_item_by_provider_ref(&pool, "images", "pr-1").await.unwrap().unwrap();
        assert_eq!(item.item_index, 0);
        assert_eq!(item.status, "processing");

        assert!(record_item_result(&pool, &task_id, 0, "completed", Some("https://r.example/a.png"), None)
            .await
            .unwrap());
        assert!(!record_item_result(&pool, &task_id, 0, "failed", None, Some("late")).await.unwrap());
        assert!(record_item_result(&pool, &task_id, 1, "failed", None, Some("nsfw")).await.unwrap());

        let counts = counts(&pool, &task_id).await.unwrap();
        assert_eq!(counts, BatchCounts { total: 2, completed: 1, failed: 1 });
    }
}
