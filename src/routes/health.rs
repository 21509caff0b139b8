use axum::{extract::State, routing::get, Json, Router};

use crate::models::HealthResponse;
use crate::providers::ProviderKind;

#[derive(Clone)]
pub struct HealthState {
    pub providers: Vec<String>,
}

pub fn router(providers: Vec<ProviderKind>) -> Router {
    let state = HealthState {
        providers: providers.iter().map(|k| k.to_string()).collect(),
    };
    Router::new()
        .route("/api/v1/health", get(health_check))
        .with_state(state)
}

/// API health check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "API is up", body = HealthResponse),
    ),
    tag = "System"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        providers: state.providers,
    })
}
