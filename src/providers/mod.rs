//! External AI providers.
//!
//! Each provider sits behind [`ProviderAdapter`]; the orchestration core
//! only ever talks to the trait, looked up through [`ProviderRegistry`].

pub mod clips;
pub mod http;
pub mod images;
pub mod persona;
mod replicate;
pub mod signature;
pub mod throttle;
pub mod transcription;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{AspectRatio, ProviderJobRef, TaskResult, TaskType};

pub use clips::ClipsAdapter;
pub use images::ImagesAdapter;
pub use persona::PersonaAdapter;
pub use transcription::TranscriptionAdapter;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Clips,
    Persona,
    Images,
    Transcription,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Clips,
        ProviderKind::Persona,
        ProviderKind::Images,
        ProviderKind::Transcription,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Clips => "clips",
            ProviderKind::Persona => "persona",
            ProviderKind::Images => "images",
            ProviderKind::Transcription => "transcription",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderKind {
    type Err = AppError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ProviderKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| AppError::UnknownProvider(s.to_string()))
    }
}

/// Provider job state, normalized from each provider's vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Processing,
    Ready,
    Failed,
}

/// Normalized answer of a status query or a webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStatus {
    pub state: JobState,
    /// Provider-reported completion, when it has one
    pub progress_hint: Option<u8>,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
}

impl ProviderStatus {
    pub fn processing(progress_hint: Option<u8>) -> Self {
        Self {
            state: JobState::Processing,
            progress_hint,
            result: None,
            error: None,
        }
    }

    pub fn ready(result: TaskResult) -> Self {
        Self {
            state: JobState::Ready,
            progress_hint: Some(100),
            result: Some(result),
            error: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: JobState::Failed,
            progress_hint: None,
            result: None,
            error: Some(reason.into()),
        }
    }

    /// Terminal notification that carries no outcome details. The caller has
    /// to fetch them with a status query.
    pub fn terminal_without_details(state: JobState) -> Self {
        Self {
            state,
            progress_hint: None,
            result: None,
            error: None,
        }
    }

    pub fn needs_fetch(&self) -> bool {
        match self.state {
            JobState::Processing => false,
            JobState::Ready => self.result.is_none(),
            JobState::Failed => self.error.is_none(),
        }
    }
}

/// Decoded webhook delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackEvent {
    pub job_id: String,
    pub status: ProviderStatus,
}

/// Provider-facing description of one unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum JobRequest {
    Transcription {
        language: Option<String>,
    },
    Clips {
        aspect_ratio: AspectRatio,
        max_clips: u32,
        language: Option<String>,
    },
    PersonaTraining {
        trigger_word: String,
        image_urls: Vec<String>,
        steps: Option<u32>,
    },
    Thumbnail {
        prompt: String,
        aspect_ratio: AspectRatio,
    },
}

/// Everything an adapter needs to create a job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub project_id: String,
    pub task_type: TaskType,
    /// Rate-limit key
    pub user_id: String,
    pub source_media_url: String,
    pub callback_url: Option<String>,
    pub request: JobRequest,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    /// The provider refused the job or answered something we cannot use.
    #[error("provider rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    /// Network failure, timeout, throttling or provider outage.
    #[error("provider temporarily unavailable: {0}")]
    Transient(String),

    #[error("invalid callback payload: {0}")]
    InvalidCallback(String),
}

impl ProviderError {
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            return ProviderError::Transient(e.to_string());
        }
        if let Some(status) = e.status() {
            return http::classify_status(status, e.to_string());
        }
        if e.is_decode() || e.is_builder() {
            return ProviderError::rejected("invalid_response", e.to_string());
        }
        ProviderError::Transient(e.to_string())
    }
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Creates the external job, waiting for a rate-limit token first.
    async fn create_job(&self, spec: &JobSpec) -> std::result::Result<ProviderJobRef, ProviderError>;

    async fn query_status(&self, job_id: &str) -> std::result::Result<ProviderStatus, ProviderError>;

    fn parse_callback(&self, body: &[u8]) -> std::result::Result<CallbackEvent, ProviderError>;

    /// Periodic cleanup of in-memory state.
    fn housekeeping(&self) {}
}

/// Adapters available at runtime, keyed by provider kind.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an HTTP adapter for every provider that has an API key.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = Self::new();

        for kind in ProviderKind::ALL {
            let provider = config.provider(kind);
            if !provider.is_enabled() {
                tracing::warn!(provider = %kind, "No API key configured, provider disabled");
                continue;
            }

            let adapter: Arc<dyn ProviderAdapter> = match kind {
                ProviderKind::Clips => Arc::new(ClipsAdapter::new(provider)?),
                ProviderKind::Persona => Arc::new(PersonaAdapter::new(provider)?),
                ProviderKind::Images => Arc::new(ImagesAdapter::new(provider)?),
                ProviderKind::Transcription => Arc::new(TranscriptionAdapter::new(provider)?),
            };
            registry.register(adapter);
        }

        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&kind).cloned()
    }

    /// Adapter serving `task_type`. A disabled provider is a client error.
    pub fn for_task(&self, task_type: TaskType) -> Result<Arc<dyn ProviderAdapter>> {
        self.get(task_type.provider()).ok_or_else(|| {
            AppError::Validation(format!(
                "task type '{}' is not available: provider '{}' is not configured",
                task_type,
                task_type.provider()
            ))
        })
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn housekeeping(&self) {
        for adapter in self.adapters.values() {
            adapter.housekeeping();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_webhook_path() {
        assert_eq!("clips".parse::<ProviderKind>().unwrap(), ProviderKind::Clips);
        let err = "vizard".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, AppError::UnknownProvider(_)));
    }

    #[test]
    fn ready_without_result_needs_fetch() {
        assert!(ProviderStatus::terminal_without_details(JobState::Ready).needs_fetch());
        assert!(ProviderStatus::terminal_without_details(JobState::Failed).needs_fetch());
        assert!(!ProviderStatus::ready(TaskResult::default()).needs_fetch());
        assert!(!ProviderStatus::failed("boom").needs_fetch());
        assert!(!ProviderStatus::processing(None).needs_fetch());
    }

    #[test]
    fn registry_without_keys_is_empty() {
        let registry = ProviderRegistry::from_config(&Config::default()).unwrap();
        assert!(registry.kinds().is_empty());
        assert!(matches!(
            registry.for_task(TaskType::Clips),
            Err(AppError::Validation(_))
        ));
    }
}
