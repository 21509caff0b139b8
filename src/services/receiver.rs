use std::sync::Arc;

use crate::config::Config;
use crate::db::batches;
use crate::error::{AppError, Result};
use crate::models::{ProviderJobRef, WebhookAck, WebhookOutcome};
use crate::providers::{signature, CallbackEvent, ProviderAdapter, ProviderKind, ProviderRegistry, ProviderStatus};
use crate::services::batch::BatchCoordinator;
use crate::services::store::TaskStore;

/// Entry point of provider push notifications.
///
/// The owning task is found by (provider, provider job id) only; ids inside
/// the payload are never trusted. Once the delivery is authenticated and
/// decoded it is always acknowledged, so a provider never retries a delivery
/// we failed to process internally. The sweeper catches up on those.
#[derive(Clone)]
pub struct WebhookReceiver {
    config: Arc<Config>,
    store: TaskStore,
    providers: Arc<ProviderRegistry>,
    batches: BatchCoordinator,
}

impl WebhookReceiver {
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

    pub async fn handle_callback(
        &self,
        provider_name: &str,
        signature_header: Option<&str>,
        body: &[u8],
    ) -> Result<WebhookAck> {
        let kind: ProviderKind = provider_name.parse()?;
        let adapter = self
            .providers
            .get(kind)
            .ok_or_else(|| AppError::UnknownProvider(provider_name.to_string()))?;

        if let Some(secret) = self.config.provider(kind).webhook_secret.as_deref() {
            if !secret.is_empty() && !signature::verify(secret, body, signature_header) {
                tracing::warn!(provider = %kind, "Webhook rejected: bad signature");
                return Err(AppError::InvalidSignature);
            }
        }

        let event = adapter.parse_callback(body)?;

        let outcome = match self.apply(kind, adapter.as_ref(), event.clone()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    provider = %kind,
                    provider_job_id = %event.job_id,
                    "Webhook processing failed: {}",
                    e
                );
                WebhookOutcome::Unchanged
            }
        };

        Ok(WebhookAck::new(outcome))
    }

    async fn apply(
        &self,
        kind: ProviderKind,
        adapter: &dyn ProviderAdapter,
        event: CallbackEvent,
    ) -> Result<WebhookOutcome> {
        let job = ProviderJobRef::new(kind, event.job_id);

        if let Some(task) = self.store.find_by_provider_ref(&job).await? {
            tracing::info!(
                project_id = %task.project_id,
                task_type = %task.task_type,
                provider_job_id = %job.job_id,
                state = ?event.status.state,
                "Webhook received"
            );
            let Some(status) = self.complete_status(adapter, &job, event.status).await else {
                return Ok(WebhookOutcome::Unchanged);
            };
            let changed = self.store.apply_status(&task, &status).await?;
            return Ok(outcome(changed));
        }

        if let Some(item) =
            batches::find_item_by_provider_ref(self.store.db(), kind.as_str(), &job.job_id).await?
        {
            tracing::info!(
                batch_id = %item.task_id,
                item = item.item_index,
                provider_job_id = %job.job_id,
                "Webhook received for batch item"
            );
            let Some(status) = self.complete_status(adapter, &job, event.status).await else {
                return Ok(WebhookOutcome::Unchanged);
            };
            let changed = self.batches.apply_item_status(&item, &status).await?;
            return Ok(outcome(changed));
        }

        tracing::info!(
            provider = %kind,
            provider_job_id = %job.job_id,
            "Webhook for unknown provider job ignored"
        );
        Ok(WebhookOutcome::Ignored)
    }

    /// Fetches the outcome when the delivery only announced it.
    async fn complete_status(
        &self,
        adapter: &dyn ProviderAdapter,
        job: &ProviderJobRef,
        status: ProviderStatus,
    ) -> Option<ProviderStatus> {
        if !status.needs_fetch() {
            return Some(status);
        }

        match adapter.query_status(&job.job_id).await {
            Ok(fetched) => Some(fetched),
            Err(e) => {
                tracing::warn!(
                    provider = %job.provider,
                    provider_job_id = %job.job_id,
                    "Could not fetch job outcome, leaving it to the poller: {}",
                    e
                );
                None
            }
        }
    }
}

fn outcome(changed: bool) -> WebhookOutcome {
    if changed {
        WebhookOutcome::Applied
    } else {
        WebhookOutcome::Unchanged
    }
}
