#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;

use repurpose::config::Config;
use repurpose::db::{self, projects};
use repurpose::models::{Artifact, ArtifactKind, AuthInfo, ProviderJobRef, TaskResult};
use repurpose::providers::{
    CallbackEvent, JobSpec, ProviderAdapter, ProviderError, ProviderKind, ProviderRegistry, ProviderStatus,
};
use repurpose::services::Orchestrator;

pub const OWNER: &str = "user-1";

/// Adapter with scripted answers. Unscripted creations get sequential ids
/// (`<kind>-1`, `<kind>-2`, ...), unscripted queries report processing.
pub struct FakeAdapter {
    kind: ProviderKind,
    artifact_kind: ArtifactKind,
    creations: Mutex<VecDeque<Result<String, ProviderError>>>,
    queries: Mutex<VecDeque<Result<ProviderStatus, ProviderError>>>,
    pub create_calls: AtomicUsize,
    pub query_calls: AtomicUsize,
}

impl FakeAdapter {
    pub fn new(kind: ProviderKind) -> Arc<Self> {
        let artifact_kind = match kind {
            ProviderKind::Clips => ArtifactKind::Clip,
            ProviderKind::Persona => ArtifactKind::PersonaWeights,
            ProviderKind::Images => ArtifactKind::Thumbnail,
            ProviderKind::Transcription => ArtifactKind::Transcript,
        };
        Arc::new(Self {
            kind,
            artifact_kind,
            creations: Mutex::new(VecDeque::new()),
            queries: Mutex::new(VecDeque::new()),
            create_calls: AtomicUsize::new(0),
            query_calls: AtomicUsize::new(0),
        })
    }

    pub fn script_create(&self, result: Result<&str, ProviderError>) {
        self.creations
            .lock()
            .unwrap()
            .push_back(result.map(str::to_string));
    }

    pub fn script_query(&self, result: Result<ProviderStatus, ProviderError>) {
        self.queries.lock().unwrap().push_back(result);
    }

    pub fn creates(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn ready(&self, urls: &[&str]) -> ProviderStatus {
        ProviderStatus::ready(TaskResult::with_artifacts(
            urls.iter()
                .map(|u| Artifact::new(self.artifact_kind, *u))
                .collect(),
        ))
    }
}

#[derive(Deserialize)]
struct FakeCallback {
    id: String,
    status: String,
    #[serde(default)]
    urls: Vec<String>,
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    error: Option<String>,
}

#[async_trait]
impl ProviderAdapter for FakeAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn create_job(&self, _spec: &JobSpec) -> Result<ProviderJobRef, ProviderError> {
        let n = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let scripted = self.creations.lock().unwrap().pop_front();
        match scripted {
            Some(Ok(id)) => Ok(ProviderJobRef::new(self.kind, id)),
            Some(Err(e)) => Err(e),
            None => Ok(ProviderJobRef::new(self.kind, format!("{}-{}", self.kind, n))),
        }
    }

    async fn query_status(&self, _job_id: &str) -> Result<ProviderStatus, ProviderError> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.queries.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(ProviderStatus::processing(None)))
    }

    fn parse_callback(&self, body: &[u8]) -> Result<CallbackEvent, ProviderError> {
        let cb: FakeCallback =
            serde_json::from_slice(body).map_err(|e| ProviderError::InvalidCallback(e.to_string()))?;

        let status = match cb.status.as_str() {
            "ready" => {
                let urls: Vec<&str> = cb.urls.iter().map(String::as_str).collect();
                self.ready(&urls)
            }
            "failed" => ProviderStatus::failed(cb.error.unwrap_or_else(|| "failed".to_string())),
            _ => ProviderStatus::processing(cb.progress),
        };

        Ok(CallbackEvent { job_id: cb.id, status })
    }
}

/// Config with near-instant retries and no callback secrets.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.orchestration.retry_base_delay_ms = 1;
    config.orchestration.retry_max_delay_ms = 2;
    config
}

pub async fn orchestrator(config: Config, adapters: &[Arc<FakeAdapter>]) -> Orchestrator {
    let pool = db::init_memory_db().await.unwrap();

    let mut registry = ProviderRegistry::new();
    for adapter in adapters {
        registry.register(adapter.clone());
    }

    Orchestrator::new(Arc::new(config), pool, registry)
}

pub async fn create_project(orchestrator: &Orchestrator, id: &str) {
    let created = projects::create_project(
        orchestrator.store.db(),
        id,
        OWNER,
        "https://cdn.example.com/uploads/video.mp4",
    )
    .await
    .unwrap();
    assert!(created);
}

pub fn owner() -> AuthInfo {
    AuthInfo::new(OWNER)
}

pub fn callback(id: &str, status: &str, urls: &[&str]) -> Vec<u8> {
    serde_json::json!({ "id": id, "status": status, "urls": urls })
        .to_string()
        .into_bytes()
}
