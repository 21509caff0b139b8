mod common;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use repurpose::providers::ProviderKind;
use repurpose::routes::create_router;

async fn app() -> Router {
    let clips = FakeAdapter::new(ProviderKind::Clips);
    let orch = orchestrator(test_config(), &[clips]).await;
    create_project(&orch, "P1").await;
    create_router(orch)
}

fn request(method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("X-User-Id", user);
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_lists_configured_providers() {
    let response = app()
        .await
        .oneshot(request("GET", "/api/v1/health", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["providers"], json!(["clips"]));
}

#[tokio::test]
async fn user_routes_require_user_header() {
    let response = app()
        .await
        .oneshot(request("GET", "/api/v1/tasks/P1", None, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["status"], 401);
}

#[tokio::test]
async fn start_is_accepted_once() {
    let app = app().await;

    let first = app
        .clone()
        .oneshot(request("POST", "/api/v1/tasks/P1/clips", Some(OWNER), None))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let body = json_body(first).await;
    assert_eq!(body["accepted"], true);
    assert_eq!(body["task"]["status"], "processing");
    assert_eq!(body["task"]["percent"], 5);

    let second = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/tasks/P1/clips",
            Some(OWNER),
            Some(json!({ "max_clips": 5 })),
        ))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    let body = json_body(second).await;
    assert_eq!(body["already_active"], true);
    assert_eq!(body["accepted"], false);
}

#[tokio::test]
async fn start_rejects_bad_requests() {
    let app = app().await;

    let unknown_type = app
        .clone()
        .oneshot(request("POST", "/api/v1/tasks/P1/dubbing", Some(OWNER), None))
        .await
        .unwrap();
    assert_eq!(unknown_type.status(), StatusCode::BAD_REQUEST);

    let bad_payload = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/tasks/P1/clips",
            Some(OWNER),
            Some(json!({ "aspect_ratio": "2:1" })),
        ))
        .await
        .unwrap();
    assert_eq!(bad_payload.status(), StatusCode::BAD_REQUEST);

    let missing_project = app
        .clone()
        .oneshot(request("POST", "/api/v1/tasks/P404/clips", Some(OWNER), None))
        .await
        .unwrap();
    assert_eq!(missing_project.status(), StatusCode::NOT_FOUND);

    let not_owner = app
        .oneshot(request("POST", "/api/v1/tasks/P1/clips", Some("user-2"), None))
        .await
        .unwrap();
    assert_eq!(not_owner.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn polling_a_task_never_started_is_not_found() {
    let response = app()
        .await
        .oneshot(request("GET", "/api/v1/tasks/P1/clips", Some(OWNER), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn project_lifecycle() {
    let app = app().await;

    let created = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/projects",
            Some(OWNER),
            Some(json!({ "id": "P2", "source_media_url": "https://cdn.example.com/p2.mp4" })),
        ))
        .await
        .unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    let body = json_body(created).await;
    assert_eq!(body["id"], "P2");
    assert_eq!(body["status"], "draft");

    let duplicate = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/projects",
            Some(OWNER),
            Some(json!({ "id": "P2", "source_media_url": "https://cdn.example.com/p2.mp4" })),
        ))
        .await
        .unwrap();
    assert_eq!(duplicate.status(), StatusCode::BAD_REQUEST);

    let bad_url = app
        .clone()
        .oneshot(request(
            "POST",
            "/api/v1/projects",
            Some(OWNER),
            Some(json!({ "source_media_url": "ftp://cdn.example.com/p3.mp4" })),
        ))
        .await
        .unwrap();
    assert_eq!(bad_url.status(), StatusCode::BAD_REQUEST);

    let deleted = app
        .clone()
        .oneshot(request("DELETE", "/api/v1/projects/P2", Some(OWNER), None))
        .await
        .unwrap();
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

    let gone = app
        .oneshot(request("GET", "/api/v1/projects/P2", Some(OWNER), None))
        .await
        .unwrap();
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn webhook_errors_map_to_status_codes() {
    let app = app().await;

    let unknown = app
        .clone()
        .oneshot(request("POST", "/api/v1/webhooks/vimeo", None, Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let malformed = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/clips")
                .body(Body::from("not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let ignored = app
        .oneshot(request(
            "POST",
            "/api/v1/webhooks/clips",
            None,
            Some(json!({ "id": "V-404", "status": "ready" })),
        ))
        .await
        .unwrap();
    assert_eq!(ignored.status(), StatusCode::OK);
    let body = json_body(ignored).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["outcome"], "ignored");
}

#[tokio::test]
async fn oversized_webhooks_are_rejected() {
    let clips = FakeAdapter::new(ProviderKind::Clips);
    let mut config = test_config();
    config.max_webhook_body_kb = 1;
    let app = create_router(orchestrator(config, &[clips]).await);

    let body = vec![b'x'; 4096];
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/clips")
                .header(header::CONTENT_LENGTH, body.len())
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
