//! Task orchestration core.

pub mod batch;
pub mod dispatcher;
pub mod guard;
pub mod receiver;
pub mod reconciler;
pub mod retry;
pub mod store;

use std::sync::Arc;

use crate::config::Config;
use crate::db::projects::{self, ProjectRecord};
use crate::db::DbPool;
use crate::error::{AppError, Result};
use crate::providers::ProviderRegistry;

pub use batch::BatchCoordinator;
pub use dispatcher::{JobDispatcher, StartOutcome};
pub use receiver::WebhookReceiver;
pub use reconciler::PollingReconciler;
pub use store::TaskStore;

/// Every orchestration component, wired over one store and one registry.
#[derive(Clone)]
pub struct Orchestrator {
    pub config: Arc<Config>,
    pub store: TaskStore,
    pub providers: Arc<ProviderRegistry>,
    pub dispatcher: JobDispatcher,
    pub receiver: WebhookReceiver,
    pub reconciler: PollingReconciler,
    pub batches: BatchCoordinator,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, db: DbPool, providers: ProviderRegistry) -> Self {
        let store = TaskStore::new(db);
        let providers = Arc::new(providers);
        let batches = BatchCoordinator::new(config.clone(), store.clone(), providers.clone());

        Self {
            dispatcher: JobDispatcher::new(config.clone(), store.clone(), providers.clone(), batches.clone()),
            receiver: WebhookReceiver::new(config.clone(), store.clone(), providers.clone(), batches.clone()),
            reconciler: PollingReconciler::new(config.clone(), store.clone(), providers.clone(), batches.clone()),
            config,
            store,
            providers,
            batches,
        }
    }
}

/// Loads the project and checks that `user_id` owns it.
pub async fn ensure_project_owner(db: &DbPool, project_id: &str, user_id: &str) -> Result<ProjectRecord> {
    let project = projects::get_project(db, project_id)
        .await?
        .ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))?;

    if project.owner_id != user_id {
        return Err(AppError::Forbidden(format!(
            "project {} belongs to another user",
            project_id
        )));
    }

    Ok(project)
}
