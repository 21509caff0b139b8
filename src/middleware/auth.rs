use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
    Json,
};
use serde_json::json;

use crate::models::AuthInfo;

/// Header set by the upstream auth layer once the caller is authenticated
pub const USER_ID_HEADER: &str = "x-user-id";

/// Middleware for user routes
///
/// Authentication itself happens upstream; this layer only takes the
/// resolved user id from `X-User-Id` and exposes it as `Extension<AuthInfo>`.
pub async fn require_user(
    mut request: Request,
    next: Next,
) -> Result<Response, (StatusCode, Json<serde_json::Value>)> {
    let user_id = request
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let Some(user_id) = user_id else {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "Authentication required: missing X-User-Id header",
                "status": 401
            })),
        ));
    };

    request.extensions_mut().insert(AuthInfo::new(user_id));

    Ok(next.run(request).await)
}
