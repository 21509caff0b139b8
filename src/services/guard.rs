use crate::error::Result;
use crate::models::{ProviderJobRef, Task, TaskType};
use crate::services::store::TaskStore;

/// Keeps a (project, task type) pair from creating a second provider job.
///
/// The read here is a shortcut; the storage constraints behind
/// [`TaskStore::set_provider_ref`] are what actually hold under races.
#[derive(Clone, Debug)]
pub struct IdempotencyGuard {
    store: TaskStore,
}

impl IdempotencyGuard {
    pub fn new(store: TaskStore) -> Self {
        Self { store }
    }

    /// Returns the recorded provider job of the pair, if any, and whether one
    /// exists.
    pub async fn ensure_single_submission(
        &self,
        project_id: &str,
        task_type: TaskType,
    ) -> Result<(Option<ProviderJobRef>, bool)> {
        let existing = self
            .store
            .get(project_id, task_type)
            .await?
            .and_then(|task| task.provider_ref);

        if let Some(job) = &existing {
            tracing::info!(
                project_id = %project_id,
                task_type = %task_type,
                provider_job_id = %job.job_id,
                "Provider job already recorded, skipping creation"
            );
        }

        let exists = existing.is_some();
        Ok((existing, exists))
    }

    /// Records a freshly created provider job. Returns false when another
    /// submission got there first.
    pub async fn record_submission(&self, task: &Task, job: &ProviderJobRef, percent: u8) -> Result<bool> {
        let recorded = self.store.set_provider_ref(task, job, percent).await?;
        if !recorded {
            tracing::warn!(
                project_id = %task.project_id,
                task_type = %task.task_type,
                provider_job_id = %job.job_id,
                "Provider job created but another submission was recorded first"
            );
        }
        Ok(recorded)
    }
}
