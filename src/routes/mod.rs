pub mod health;
pub mod projects;
pub mod tasks;
pub mod webhooks;

use axum::{middleware, Router};

use crate::middleware::auth;
use crate::services::Orchestrator;

/// Every API route. Task and project routes require `X-User-Id`; health and
/// webhook routes do not.
pub fn create_router(orchestrator: Orchestrator) -> Router {
    let user_routes = Router::new()
        .merge(tasks::router(orchestrator.clone()))
        .merge(projects::router(orchestrator.clone()))
        .layer(middleware::from_fn(auth::require_user));

    Router::new()
        .merge(health::router(orchestrator.providers.kinds()))
        .merge(webhooks::router(orchestrator))
        .merge(user_routes)
}
