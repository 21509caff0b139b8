//! Fan-out of one task into independently tracked provider jobs.
//!
//! Each item is submitted on its own, so one failure never aborts its
//! siblings. Only a rejected item fails; an item whose creation failed
//! transiently stays pending and is resubmitted on a later poll. The parent
//! task is re-aggregated after every effective item write: percent is the
//! share of terminal items, `completed` once every item is terminal and at
//! least one succeeded, `failed` when all failed.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;

use crate::config::Config;
use crate::db::{self, batches::{self, BatchCounts, BatchItemRecord}, projects};
use crate::error::{AppError, Result};
use crate::models::{
    Artifact, ArtifactKind, BatchItemOutcome, Task, TaskPayload, TaskResult, TaskStatus, ThumbnailBatchRequest,
};
use crate::providers::{JobRequest, JobSpec, JobState, ProviderAdapter, ProviderRegistry, ProviderStatus};
use crate::services::retry::{retry_transient, RetryConfig};
use crate::services::store::TaskStore;

/// Terminal outcome of one batch item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemResult {
    Succeeded { output_url: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchVerdict {
    pub percent: u8,
    pub status: TaskStatus,
}

/// Parent state from item counts.
pub fn aggregate(counts: BatchCounts) -> BatchVerdict {
    let total = counts.total.max(0) as u64;
    let completed = counts.completed.max(0) as u64;
    let terminal = completed + counts.failed.max(0) as u64;

    if total == 0 {
        return BatchVerdict {
            percent: 100,
            status: TaskStatus::Failed,
        };
    }

    let percent = ((100 * terminal + total / 2) / total).min(100) as u8;
    let status = if terminal < total {
        TaskStatus::Processing
    } else if completed > 0 {
        TaskStatus::Completed
    } else {
        TaskStatus::Failed
    };

    BatchVerdict { percent, status }
}

/// One provider request per prompt, in prompt order.
pub fn item_requests(request: &ThumbnailBatchRequest) -> Vec<JobRequest> {
    request
        .prompts
        .iter()
        .map(|prompt| JobRequest::Thumbnail {
            prompt: prompt.clone(),
            aspect_ratio: request.aspect_ratio,
        })
        .collect()
}

#[derive(Clone)]
pub struct BatchCoordinator {
    config: Arc<Config>,
    store: TaskStore,
    providers: Arc<ProviderRegistry>,
    retry: RetryConfig,
}

impl BatchCoordinator {
    pub fn new(config: Arc<Config>, store: TaskStore, providers: Arc<ProviderRegistry>) -> Self {
        Self {
            retry: RetryConfig::from(&config.orchestration),
            config,
            store,
            providers,
        }
    }

    /// Records one item per request and submits them all. Returns the batch
    /// id, which is the parent task id. When no item reached the provider the
    /// parent goes back to pending.
    pub async fn dispatch_batch(&self, task: &Task, base: &JobSpec, items: Vec<JobRequest>) -> Result<String> {
        let adapter = self.providers.for_task(task.task_type)?;

        let inputs: Vec<String> = items.iter().map(describe).collect();
        batches::insert_items(self.store.db(), &task.id, &inputs).await?;

        tracing::info!(
            project_id = %task.project_id,
            task_type = %task.task_type,
            items = items.len(),
            "Dispatching batch"
        );

        let submissions = items.into_iter().enumerate().map(|(index, request)| {
            let spec = JobSpec {
                request,
                ..base.clone()
            };
            let adapter = adapter.clone();
            async move { self.submit_item(adapter.as_ref(), task, index as u32, spec).await }
        });

        for outcome in join_all(submissions).await {
            if let Err(e) = outcome {
                tracing::error!(project_id = %task.project_id, "Batch item submission error: {}", e);
            }
        }

        let items = batches::get_items(self.store.db(), &task.id).await?;
        let none_submitted = !items.is_empty()
            && items
                .iter()
                .all(|i| i.provider_job_id.is_none() && i.status == TaskStatus::Pending.as_str());
        if none_submitted {
            self.store
                .revert_to_pending(task, "no batch item could be submitted")
                .await?;
            return Ok(task.id.clone());
        }

        self.reaggregate(&task.id).await?;
        Ok(task.id.clone())
    }

    /// Submits one item unless it already holds a provider job or is no longer
    /// pending. Returns whether the item row changed.
    async fn submit_item(&self, adapter: &dyn ProviderAdapter, task: &Task, index: u32, spec: JobSpec) -> Result<bool> {
        let items = batches::get_items(self.store.db(), &task.id).await?;
        let submittable = items.iter().any(|i| {
            i.item_index == index as i64 && i.provider_job_id.is_none() && i.status == TaskStatus::Pending.as_str()
        });
        if !submittable {
            return Ok(false);
        }

        match retry_transient(&self.retry, "create_job", || adapter.create_job(&spec)).await {
            Ok(job) => {
                let recorded = batches::set_item_provider_ref(
                    self.store.db(),
                    &task.id,
                    index,
                    job.provider.as_str(),
                    &job.job_id,
                )
                .await?;
                if recorded {
                    tracing::info!(
                        project_id = %task.project_id,
                        task_type = %task.task_type,
                        item = index,
                        provider_job_id = %job.job_id,
                        "Batch item submitted"
                    );
                } else {
                    tracing::warn!(
                        project_id = %task.project_id,
                        item = index,
                        provider_job_id = %job.job_id,
                        "Batch item was submitted concurrently, provider job not recorded"
                    );
                }
                Ok(recorded)
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    project_id = %task.project_id,
                    task_type = %task.task_type,
                    item = index,
                    "Batch item submission deferred: {}",
                    e
                );
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(
                    project_id = %task.project_id,
                    task_type = %task.task_type,
                    item = index,
                    "Batch item rejected: {}",
                    e
                );
                Ok(batches::record_item_result(
                    self.store.db(),
                    &task.id,
                    index,
                    TaskStatus::Failed.as_str(),
                    None,
                    Some(&e.to_string()),
                )
                .await?)
            }
        }
    }

    /// Resubmits items still pending without a provider job once they have
    /// been idle for the stale submission window.
    async fn resubmit_pending(&self, adapter: &dyn ProviderAdapter, task: &Task, items: &[BatchItemRecord]) -> Result<bool> {
        let window = chrono::Duration::from_std(self.config.orchestration.stale_submission())
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let cutoff = db::timestamp(Utc::now() - window);

        let pending: Vec<&BatchItemRecord> = items
            .iter()
            .filter(|i| {
                i.status == TaskStatus::Pending.as_str() && i.provider_job_id.is_none() && i.updated_at < cutoff
            })
            .collect();
        if pending.is_empty() {
            return Ok(false);
        }

        let requests = match task.payload.clone().map(|v| TaskPayload::parse(task.task_type, v)) {
            Some(Ok(TaskPayload::ThumbnailBatch(request))) => item_requests(&request),
            _ => return Err(AppError::Internal(format!("batch {} has no usable payload", task.id))),
        };
        let project = projects::get_project(self.store.db(), &task.project_id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound(task.project_id.clone()))?;

        let mut changed = false;
        for item in pending {
            let index = item.item_index.max(0) as u32;
            let Some(request) = requests.get(index as usize).cloned() else {
                changed |= batches::record_item_result(
                    self.store.db(),
                    &task.id,
                    index,
                    TaskStatus::Failed.as_str(),
                    None,
                    Some("no request for this item"),
                )
                .await?;
                continue;
            };

            let spec = JobSpec {
                project_id: task.project_id.clone(),
                task_type: task.task_type,
                user_id: project.owner_id.clone(),
                source_media_url: project.source_media_url.clone(),
                callback_url: Some(self.config.callback_url(task.task_type.provider())),
                request,
            };
            tracing::info!(project_id = %task.project_id, item = index, "Resubmitting batch item");
            changed |= self.submit_item(adapter, task, index, spec).await?;
        }

        Ok(changed)
    }

    /// Terminal write of one item, then parent re-aggregation. A second
    /// result for the same item is a no-op.
    pub async fn record_item_result(&self, batch_id: &str, index: u32, result: ItemResult) -> Result<bool> {
        let (status, output_url, error) = match &result {
            ItemResult::Succeeded { output_url } => (TaskStatus::Completed, Some(output_url.as_str()), None),
            ItemResult::Failed { error } => (TaskStatus::Failed, None, Some(error.as_str())),
        };

        let applied =
            batches::record_item_result(self.store.db(), batch_id, index, status.as_str(), output_url, error).await?;

        if applied {
            tracing::info!(batch_id = %batch_id, item = index, status = %status, "Batch item finished");
            self.reaggregate(batch_id).await?;
        }
        Ok(applied)
    }

    /// Maps a provider status onto one item. Progress of single items is not
    /// tracked.
    pub async fn apply_item_status(&self, item: &BatchItemRecord, status: &ProviderStatus) -> Result<bool> {
        let index = item.item_index.max(0) as u32;
        let result = match status.state {
            JobState::Processing => return Ok(false),
            JobState::Ready => {
                let Some(result) = &status.result else {
                    return Ok(false);
                };
                match result.artifacts.iter().find_map(|a| a.url.clone()) {
                    Some(output_url) => ItemResult::Succeeded { output_url },
                    None => ItemResult::Failed {
                        error: "provider returned no output".to_string(),
                    },
                }
            }
            JobState::Failed => ItemResult::Failed {
                error: status
                    .error
                    .clone()
                    .unwrap_or_else(|| "provider reported a failure".to_string()),
            },
        };

        self.record_item_result(&item.task_id, index, result).await
    }

    /// Resubmits stale pending items, then queries every submitted,
    /// non-terminal item of the batch.
    pub async fn poll_items(&self, task: &Task) -> Result<bool> {
        let adapter = self.providers.for_task(task.task_type)?;
        let items = batches::get_items(self.store.db(), &task.id).await?;

        let mut changed = self.resubmit_pending(adapter.as_ref(), task, &items).await?;
        if changed {
            self.reaggregate(&task.id).await?;
        }

        for item in items.iter().filter(|i| i.status == TaskStatus::Processing.as_str()) {
            let Some(job_id) = item.provider_job_id.as_deref() else {
                continue;
            };
            match adapter.query_status(job_id).await {
                Ok(status) => changed |= self.apply_item_status(item, &status).await?,
                Err(e) if e.is_transient() => {
                    tracing::debug!(provider_job_id = %job_id, "Batch item poll deferred: {}", e);
                }
                Err(e) => {
                    changed |= self
                        .record_item_result(&task.id, item.item_index.max(0) as u32, ItemResult::Failed { error: e.to_string() })
                        .await?;
                }
            }
        }

        Ok(changed)
    }

    async fn reaggregate(&self, batch_id: &str) -> Result<()> {
        let task = self
            .store
            .get_by_id(batch_id)
            .await?
            .ok_or_else(|| AppError::TaskNotFound(batch_id.to_string()))?;
        if task.status.is_terminal() {
            return Ok(());
        }

        let counts = batches::counts(self.store.db(), batch_id).await?;
        let verdict = aggregate(counts);

        match verdict.status {
            TaskStatus::Completed => {
                let items = batches::get_items(self.store.db(), batch_id).await?;
                self.store.set_result(&task, &batch_result(&items)).await?;
            }
            TaskStatus::Failed => {
                let items = batches::get_items(self.store.db(), batch_id).await?;
                let first_error = items.iter().find_map(|i| i.error.clone()).unwrap_or_default();
                let message = format!("all {} items failed: {}", counts.total, first_error);
                self.store.set_failed(&task, &message).await?;
            }
            _ => {
                self.store.set_progress(&task, verdict.percent).await?;
            }
        }

        Ok(())
    }
}

fn describe(request: &JobRequest) -> String {
    match request {
        JobRequest::Thumbnail { prompt, aspect_ratio } => {
            serde_json::json!({ "prompt": prompt, "aspect_ratio": aspect_ratio }).to_string()
        }
        other => format!("{:?}", other),
    }
}

fn batch_result(items: &[BatchItemRecord]) -> TaskResult {
    let artifacts = items
        .iter()
        .filter_map(|i| {
            let url = i.output_url.clone()?;
            let mut artifact = Artifact::new(ArtifactKind::Thumbnail, url);
            artifact.metadata = serde_json::json!({ "item_index": i.item_index });
            Some(artifact)
        })
        .collect();

    let outcomes = items
        .iter()
        .map(|i| BatchItemOutcome {
            index: i.item_index.max(0) as u32,
            status: i.status.parse().unwrap_or(TaskStatus::Failed),
            output_url: i.output_url.clone(),
            error: i.error.clone(),
        })
        .collect();

    TaskResult {
        artifacts,
        details: None,
        items: outcomes,
    }
}
