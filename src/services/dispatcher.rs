use std::sync::Arc;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{AuthInfo, Task, TaskPayload, TaskType};
use crate::providers::{JobRequest, JobSpec, ProviderRegistry};
use crate::services::batch::{item_requests, BatchCoordinator};
use crate::services::guard::IdempotencyGuard;
use crate::services::retry::{retry_transient, RetryConfig};
use crate::services::store::TaskStore;
use crate::services::ensure_project_owner;

/// Result of a start request.
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// This call moved the task to processing; submission runs in background.
    Accepted(Task),
    /// The task was already processing or completed. Nothing changed.
    AlreadyActive(Task),
}

impl StartOutcome {
    pub fn task(&self) -> &Task {
        match self {
            StartOutcome::Accepted(task) | StartOutcome::AlreadyActive(task) => task,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, StartOutcome::Accepted(_))
    }
}

/// Work left after a task was accepted: the provider submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub task: Task,
    pub payload: TaskPayload,
    pub spec: JobSpec,
}

#[derive(Clone)]
pub struct JobDispatcher {
    config: Arc<Config>,
    store: TaskStore,
    providers: Arc<ProviderRegistry>,
    guard: IdempotencyGuard,
    batches: BatchCoordinator,
    retry: RetryConfig,
}

impl JobDispatcher {
    pub fn new(
        config: Arc<Config>,
        store: TaskStore,
        providers: Arc<ProviderRegistry>,
        batches: BatchCoordinator,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(store.clone()),
            retry: RetryConfig::from(&config.orchestration),
            config,
            store,
            providers,
            batches,
        }
    }

    /// Accepts the task and submits it to its provider in the background.
    pub async fn start_task(
        &self,
        auth: &AuthInfo,
        project_id: &str,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> Result<StartOutcome> {
        let (outcome, submission) = self.accept(auth, project_id, task_type, payload).await?;

        if let Some(submission) = submission {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                dispatcher.submit(submission).await;
            });
        }

        Ok(outcome)
    }

    /// Validates the request and takes the task. Nothing is written when
    /// validation fails or the task is already active.
    pub async fn accept(
        &self,
        auth: &AuthInfo,
        project_id: &str,
        task_type: TaskType,
        payload: serde_json::Value,
    ) -> Result<(StartOutcome, Option<Submission>)> {
        let project = ensure_project_owner(self.store.db(), project_id, &auth.user_id).await?;
        self.providers.for_task(task_type)?;
        let payload = TaskPayload::parse(task_type, payload)?;

        let accepted = self
            .store
            .accept(project_id, &payload, self.config.orchestration.accepted_percent)
            .await?;

        let Some(task) = accepted else {
            let task = self
                .store
                .get(project_id, task_type)
                .await?
                .ok_or_else(|| AppError::TaskNotFound(format!("{}/{}", project_id, task_type)))?;
            tracing::info!(
                project_id = %project_id,
                task_type = %task_type,
                status = %task.status,
                "Start ignored, task already in progress or done"
            );
            return Ok((StartOutcome::AlreadyActive(task), None));
        };

        let spec = JobSpec {
            project_id: project_id.to_string(),
            task_type,
            user_id: project.owner_id.clone(),
            source_media_url: project.source_media_url.clone(),
            callback_url: Some(self.config.callback_url(task_type.provider())),
            request: first_request(&payload),
        };

        let submission = Submission {
            task: task.clone(),
            payload,
            spec,
        };

        Ok((StartOutcome::Accepted(task), Some(submission)))
    }

    /// Runs a submission to completion. Failures end up in the task row.
    pub async fn submit(&self, submission: Submission) {
        let task = submission.task.clone();
        if let Err(e) = self.run_submission(submission).await {
            tracing::error!(
                project_id = %task.project_id,
                task_type = %task.task_type,
                "Submission failed: {}",
                e
            );
            if let Err(e) = self.store.set_failed(&task, &e.to_string()).await {
                tracing::error!(project_id = %task.project_id, "Could not record failure: {}", e);
            }
        }
    }

    async fn run_submission(&self, submission: Submission) -> Result<()> {
        let Submission { task, payload, spec } = submission;

        if let TaskPayload::ThumbnailBatch(request) = &payload {
            self.batches
                .dispatch_batch(&task, &spec, item_requests(request))
                .await?;
            return Ok(());
        }

        let submitted_percent = self.config.orchestration.submitted_percent;
        let (existing, already_submitted) = self
            .guard
            .ensure_single_submission(&task.project_id, task.task_type)
            .await?;

        if already_submitted {
            if let Some(job) = existing {
                tracing::debug!(provider_job_id = %job.job_id, "Reusing recorded provider job");
            }
            self.store.set_progress(&task, submitted_percent).await?;
            return Ok(());
        }

        let adapter = self.providers.for_task(task.task_type)?;

        match retry_transient(&self.retry, "create_job", || adapter.create_job(&spec)).await {
            Ok(job) => {
                self.guard.record_submission(&task, &job, submitted_percent).await?;
            }
            Err(e) if e.is_transient() => {
                self.store.revert_to_pending(&task, &e.to_string()).await?;
            }
            Err(e) => {
                self.store.set_failed(&task, &e.to_string()).await?;
            }
        }

        Ok(())
    }
}

/// Provider request of a single-job payload. For a batch this is the first
/// item; the full list is expanded at submission.
fn first_request(payload: &TaskPayload) -> JobRequest {
    match payload {
        TaskPayload::Transcription(r) => JobRequest::Transcription {
            language: r.language.clone(),
        },
        TaskPayload::Clips(r) => JobRequest::Clips {
            aspect_ratio: r.aspect_ratio,
            max_clips: r.max_clips,
            language: r.language.clone(),
        },
        TaskPayload::PersonaTraining(r) => JobRequest::PersonaTraining {
            trigger_word: r.trigger_word.clone(),
            image_urls: r.image_urls.clone(),
            steps: r.steps,
        },
        TaskPayload::ThumbnailBatch(r) => JobRequest::Thumbnail {
            prompt: r.prompts.first().cloned().unwrap_or_default(),
            aspect_ratio: r.aspect_ratio,
        },
    }
}
