use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::Result;
use crate::models::WebhookAck;
use crate::providers::signature::SIGNATURE_HEADER;
use crate::services::Orchestrator;

/// Provider callbacks. Not behind the user auth layer; authenticity comes
/// from the signature header when the provider has a webhook secret.
pub fn router(orchestrator: Orchestrator) -> Router {
    let max_body = orchestrator.config.max_webhook_body_bytes();

    Router::new()
        .route("/api/v1/webhooks/:provider", post(receive_webhook))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body))
        .with_state(orchestrator)
}

/// Provider callback
///
/// Acknowledged with 200 once the delivery is authenticated and decoded,
/// including deliveries for unknown or already finished jobs.
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/{provider}",
    tag = "Webhooks",
    params(
        ("provider" = String, Path, description = "clips, persona, images or transcription"),
        ("X-Webhook-Signature" = Option<String>, Header, description = "sha256=<hex HMAC-SHA256 of the raw body>"),
    ),
    request_body(content = serde_json::Value, description = "Provider specific payload"),
    responses(
        (status = 200, description = "Delivery acknowledged", body = WebhookAck),
        (status = 400, description = "Malformed payload"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 404, description = "Unknown or unconfigured provider"),
        (status = 413, description = "Payload too large"),
    )
)]
pub async fn receive_webhook(
    State(state): State<Orchestrator>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let ack = state.receiver.handle_callback(&provider, signature, &body).await?;

    Ok(Json(ack))
}
