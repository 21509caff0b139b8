//! SSE streaming for task progress

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    Extension,
};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

use crate::error::{AppError, Result};
use crate::models::{AuthInfo, ProgressUpdate, TaskType};
use crate::services::{ensure_project_owner, Orchestrator};

/// Progress of one (project, task type) pair. Ends after a terminal update.
pub struct TaskProgressStream {
    project_id: String,
    task_type: TaskType,
    rx: BroadcastStream<ProgressUpdate>,
    initial_update: Option<ProgressUpdate>,
    terminated: bool,
}

impl TaskProgressStream {
    fn event(&mut self, update: &ProgressUpdate) -> Event {
        if update.status.is_terminal() {
            self.terminated = true;
        }
        let json = serde_json::to_string(update).unwrap_or_default();
        Event::default().data(json)
    }

    fn is_ours(&self, update: &ProgressUpdate) -> bool {
        update.project_id == self.project_id && update.task_type == self.task_type
    }
}

impl Stream for TaskProgressStream {
    type Item = std::result::Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.terminated {
            return Poll::Ready(None);
        }

        if let Some(update) = self.initial_update.take() {
            let event = self.event(&update);
            return Poll::Ready(Some(Ok(event)));
        }

        loop {
            match Pin::new(&mut self.rx).poll_next(cx) {
                Poll::Ready(Some(Ok(update))) => {
                    if self.is_ours(&update) {
                        let event = self.event(&update);
                        return Poll::Ready(Some(Ok(event)));
                    }
                }
                // Lagged receiver: updates were dropped, the next one still
                // carries the full state.
                Poll::Ready(Some(Err(_))) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// SSE stream of a task's progress
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{project_id}/{task_type}/events",
    tag = "Tasks",
    params(
        ("project_id" = String, Path, description = "Project id"),
        ("task_type" = String, Path, description = "Task type"),
    ),
    responses(
        (status = 200, description = "SSE stream of progress updates", body = ProgressUpdate),
        (status = 404, description = "Project or task not found"),
    )
)]
pub async fn task_progress_stream(
    State(state): State<Orchestrator>,
    Extension(auth): Extension<AuthInfo>,
    Path((project_id, task_type)): Path<(String, String)>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let task_type: TaskType = task_type.parse()?;
    ensure_project_owner(state.store.db(), &project_id, &auth.user_id).await?;

    // Subscribe before reading so no update falls between the two.
    let rx = state.store.subscribe();

    let task = state
        .store
        .get(&project_id, task_type)
        .await?
        .ok_or_else(|| AppError::TaskNotFound(format!("{}/{}", project_id, task_type)))?;

    let message = task.snapshot(state.config.orchestration.max_poll_attempts).message;

    let stream = TaskProgressStream {
        project_id,
        task_type,
        rx: BroadcastStream::new(rx),
        initial_update: Some(ProgressUpdate::new(&task, message)),
        terminated: false,
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskStatus;
    use chrono::Utc;
    use tokio::sync::broadcast;
    use tokio_stream::StreamExt;

    fn update(project_id: &str, task_type: TaskType, status: TaskStatus, percent: u8) -> ProgressUpdate {
        ProgressUpdate {
            project_id: project_id.to_string(),
            task_type,
            status,
            percent,
            message: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stream_filters_and_ends_on_terminal_update() {
        let (tx, rx) = broadcast::channel(16);
        let mut stream = TaskProgressStream {
            project_id: "p1".to_string(),
            task_type: TaskType::Clips,
            rx: BroadcastStream::new(rx),
            initial_update: Some(update("p1", TaskType::Clips, TaskStatus::Processing, 5)),
            terminated: false,
        };

        tx.send(update("p2", TaskType::Clips, TaskStatus::Processing, 15)).unwrap();
        tx.send(update("p1", TaskType::Transcription, TaskStatus::Completed, 100)).unwrap();
        tx.send(update("p1", TaskType::Clips, TaskStatus::Processing, 15)).unwrap();
        tx.send(update("p1", TaskType::Clips, TaskStatus::Completed, 100)).unwrap();
        tx.send(update("p1", TaskType::Clips, TaskStatus::Processing, 50)).unwrap();

        let mut count = 0;
        while let Some(item) = stream.next().await {
            assert!(item.is_ok());
            count += 1;
        }

        // initial, 15 %, completed
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn terminal_initial_state_ends_immediately() {
        let (_tx, rx) = broadcast::channel(4);
        let mut stream = TaskProgressStream {
            project_id: "p1".to_string(),
            task_type: TaskType::Clips,
            rx: BroadcastStream::new(rx),
            initial_update: Some(update("p1", TaskType::Clips, TaskStatus::Failed, 15)),
            terminated: false,
        };

        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
    }
}
