//! Pull side of reconciliation: client-invoked polls plus a background
//! sweeper for deliveries that never arrived.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{AuthInfo, Task, TaskType};
use crate::providers::ProviderRegistry;
use crate::services::batch::BatchCoordinator;
use crate::services::ensure_project_owner;
use crate::services::store::TaskStore;

#[derive(Clone)]
pub struct PollingReconciler {
    config: Arc<Config>,
    store: TaskStore,
    providers: Arc<ProviderRegistry>,
    batches: BatchCoordinator,
}

impl PollingReconciler {
    pub fn new(
        config: Arc<Config>,
        store: TaskStore,
        providers: Arc<ProviderRegistry>,
        batches: BatchCoordinator,
    ) -> Self {
        Self {
            config,
            store,
            providers,
            batches,
        }
    }

    /// Current state of a task, refreshed from the provider when a query is
    /// allowed. Queries are capped at one per poll interval per task.
    pub async fn poll_once(&self, auth: &AuthInfo, project_id: &str, task_type: TaskType) -> Result<Task> {
        ensure_project_owner(self.store.db(), project_id, &auth.user_id).await?;

        let task = self
            .store
            .get(project_id, task_type)
            .await?
            .ok_or_else(|| AppError::TaskNotFound(format!("{}/{}", project_id, task_type)))?;

        self.reconcile(task, true).await
    }

    fn recently_polled(&self, task: &Task) -> bool {
        let Some(last) = task.last_polled_at else {
            return false;
        };
        let elapsed = Utc::now().signed_duration_since(last);
        elapsed
            .to_std()
            .map(|e| e < self.config.orchestration.poll_interval())
            .unwrap_or(true)
    }

    async fn reconcile(&self, task: Task, enforce_interval: bool) -> Result<Task> {
        if task.status.is_terminal() {
            return Ok(task);
        }
        if enforce_interval && self.recently_polled(&task) {
            return Ok(task);
        }

        if task.task_type.is_batch() {
            if !self.store.record_poll(&task).await? {
                return Ok(task);
            }
            self.batches.poll_items(&task).await?;
            return self.reload(task).await;
        }

        let Some(job) = task.provider_ref.clone() else {
            return Ok(task);
        };
        let Some(adapter) = self.providers.get(job.provider) else {
            warn!(provider = %job.provider, "Provider not configured, cannot poll");
            return Ok(task);
        };

        if !self.store.record_poll(&task).await? {
            return Ok(task);
        }

        let attempts = task.poll_attempts + 1;
        if attempts == self.config.orchestration.max_poll_attempts {
            warn!(
                project_id = %task.project_id,
                task_type = %task.task_type,
                provider_job_id = %job.job_id,
                attempts,
                "Task is taking longer than expected"
            );
        }

        match adapter.query_status(&job.job_id).await {
            Ok(status) => {
                debug!(
                    project_id = %task.project_id,
                    task_type = %task.task_type,
                    provider_job_id = %job.job_id,
                    state = ?status.state,
                    "Polled provider"
                );
                self.store.apply_status(&task, &status).await?;
            }
            Err(e) if e.is_transient() => {
                debug!(provider_job_id = %job.job_id, "Poll deferred: {}", e);
            }
            Err(e) => {
                self.store.set_failed(&task, &e.to_string()).await?;
            }
        }

        self.reload(task).await
    }

    async fn reload(&self, task: Task) -> Result<Task> {
        Ok(self.store.get_by_id(&task.id).await?.unwrap_or(task))
    }

    /// Puts accepted tasks whose submission was lost (worker restart, dropped
    /// spawn) back to pending so a new start can claim them.
    async fn recover_lost_submissions(&self, now: chrono::DateTime<Utc>) -> Result<usize> {
        let window = chrono::Duration::from_std(self.config.orchestration.stale_submission())
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        let mut recovered = 0;
        for task in self.store.stale_submissions(now - window).await? {
            if self
                .store
                .revert_to_pending(&task, "submission lost before a provider job was recorded")
                .await?
            {
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// One sweeper pass. Returns the number of tasks queried or recovered.
    pub async fn sweep_once(&self) -> Result<usize> {
        let orchestration = &self.config.orchestration;
        let now = Utc::now();
        let recovered = self.recover_lost_submissions(now).await?;
        let grace = chrono::Duration::from_std(orchestration.webhook_grace())
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let candidates = self.store.due_for_poll(now - grace).await?;
        let mut polled = 0;

        for task in candidates {
            let due = match task.last_polled_at {
                None => true,
                Some(last) => now
                    .signed_duration_since(last)
                    .to_std()
                    .map(|elapsed| elapsed >= orchestration.poll_backoff(task.poll_attempts))
                    .unwrap_or(false),
            };
            if !due {
                continue;
            }

            let (project_id, task_type) = (task.project_id.clone(), task.task_type);
            match self.reconcile(task, false).await {
                Ok(_) => polled += 1,
                Err(e) => error!(project_id = %project_id, task_type = %task_type, "Sweep poll failed: {}", e),
            }
        }

        self.providers.housekeeping();
        Ok(polled + recovered)
    }

    /// Runs the sweeper forever. Spawn it.
    pub async fn run(&self) {
        let period = self.config.orchestration.sweep_interval().max(std::time::Duration::from_secs(1));
        info!("Starting reconciliation sweeper (interval: {:?})", period);

        let mut ticker = interval(period);
        loop {
            ticker.tick().await;

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(count) => info!("Sweeper handled {} tasks", count),
                Err(e) => error!("Sweeper error: {}", e),
            }
        }
    }
}
