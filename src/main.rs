use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use repurpose::config::Config;
use repurpose::db;
use repurpose::middleware::rate_limit;
use repurpose::models::*;
use repurpose::providers::{ProviderKind, ProviderRegistry};
use repurpose::routes;
use repurpose::services::Orchestrator;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Repurpose API",
        version = "1.0.0",
        description = "Orchestrates video repurposing tasks (transcripts, clips, persona training, thumbnails) on external AI providers",
        license(name = "MIT"),
    ),
    paths(
        crate::routes::health::health_check,
        crate::routes::projects::create_project,
        crate::routes::projects::get_project,
        crate::routes::projects::delete_project,
        crate::routes::tasks::start_task,
        crate::routes::tasks::get_task,
        crate::routes::tasks::list_project_tasks,
        crate::routes::tasks::task_progress_stream,
        crate::routes::webhooks::receive_webhook,
    ),
    components(schemas(
        HealthResponse,
        ErrorResponse,
        CreateProjectRequest,
        ProjectResponse,
        ProjectStatus,
        ProjectTasksResponse,
        StartTaskResponse,
        TaskSnapshot,
        TaskType,
        TaskStatus,
        TaskResult,
        Artifact,
        ArtifactKind,
        BatchItemOutcome,
        ProgressUpdate,
        ProviderJobRef,
        ProviderKind,
        TranscriptionRequest,
        ClipsRequest,
        PersonaTrainingRequest,
        ThumbnailBatchRequest,
        AspectRatio,
        WebhookAck,
        WebhookOutcome,
    )),
    tags(
        (name = "System", description = "Health check"),
        (name = "Projects", description = "Project registration"),
        (name = "Tasks", description = "Start and track repurposing tasks"),
        (name = "Webhooks", description = "Provider callbacks"),
    ),
    servers(
        (url = "http://localhost:4000", description = "Local server"),
    ),
    security(
        ("user_id" = [])
    ),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "user_id",
                utoipa::openapi::security::SecurityScheme::ApiKey(
                    utoipa::openapi::security::ApiKey::Header(
                        utoipa::openapi::security::ApiKeyValue::new("X-User-Id"),
                    ),
                ),
            );
        }
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repurpose=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env());

    tracing::info!("Connecting to database: {}", config.database_url);

    let db_pool = match db::init_db(&config.database_url).await {
        Ok(pool) => {
            tracing::info!("SQLite database ready");
            pool
        }
        Err(e) => {
            tracing::error!("Database initialisation failed: {}", e);
            std::process::exit(1);
        }
    };

    let providers = match ProviderRegistry::from_config(&config) {
        Ok(registry) => registry,
        Err(e) => {
            tracing::error!("Provider setup failed: {}", e);
            std::process::exit(1);
        }
    };

    for kind in ProviderKind::ALL {
        if providers.get(kind).is_some() {
            tracing::info!(provider = %kind, "Provider enabled");
        } else {
            tracing::warn!(provider = %kind, "Provider disabled (no API key)");
        }
    }

    let orchestrator = Orchestrator::new(config.clone(), db_pool, providers);

    let rate_limiter = rate_limit::create_rate_limiter(config.requests_per_minute);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = routes::create_router(orchestrator.clone()).layer(middleware::from_fn(move |req, next| {
        let limiter = rate_limiter.clone();
        async move { rate_limit::rate_limit_middleware(limiter, req, next).await }
    }));

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .into_make_service_with_connect_info::<SocketAddr>();

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid listen address {}:{}: {}", config.host, config.port, e);
            std::process::exit(1);
        }
    };

    tracing::info!("========================================");
    tracing::info!("  Repurpose API v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("========================================");
    tracing::info!("Server: http://{}", addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", addr);
    tracing::info!("Callbacks: {}/api/v1/webhooks/{{provider}}", config.public_base_url);
    tracing::info!("----------------------------------------");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /api/v1/health                          - Health check");
    tracing::info!("  POST /api/v1/projects                        - Register project");
    tracing::info!("  GET  /api/v1/projects/:id                    - Project details");
    tracing::info!("  DEL  /api/v1/projects/:id                    - Delete project");
    tracing::info!("  POST /api/v1/tasks/:project_id/:task_type    - Start task");
    tracing::info!("  GET  /api/v1/tasks/:project_id/:task_type    - Task status");
    tracing::info!("  GET  /api/v1/tasks/:project_id               - Project progress");
    tracing::info!("  GET  /api/v1/tasks/:project_id/:task_type/events - SSE progress");
    tracing::info!("  POST /api/v1/webhooks/:provider              - Provider callbacks");
    tracing::info!("----------------------------------------");

    // Reconciliation sweeper for callbacks that never arrived
    let reconciler = orchestrator.reconciler.clone();
    tokio::spawn(async move {
        reconciler.run().await;
    });

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Cannot bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
