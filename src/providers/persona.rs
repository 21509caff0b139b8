//! Persona (LoRA) training provider, Replicate trainings API.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::http::{AuthScheme, ProviderHttp};
use super::replicate::Prediction;
use super::throttle::CreationThrottle;
use super::{CallbackEvent, JobRequest, JobSpec, JobState, ProviderAdapter, ProviderError, ProviderKind, ProviderStatus};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::models::{Artifact, ArtifactKind, ProviderJobRef, TaskResult};

pub struct PersonaAdapter {
    http: ProviderHttp,
    throttle: CreationThrottle,
}

impl PersonaAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new(config, AuthScheme::Bearer)?,
            throttle: CreationThrottle::new(ProviderKind::Persona, config.creations_per_minute),
        })
    }
}

fn training_input(spec: &JobSpec, trigger_word: &str, image_urls: &[String], steps: Option<u32>) -> Value {
    let mut input = json!({ "trigger_word": trigger_word });
    if image_urls.is_empty() {
        input["input_video"] = json!(spec.source_media_url);
    } else {
        input["input_images"] = json!(image_urls);
    }
    if let Some(steps) = steps {
        input["steps"] = json!(steps);
    }
    input
}

fn to_status(training: Prediction) -> ProviderStatus {
    match training.state() {
        JobState::Ready => {
            let output = training.output.clone().unwrap_or(Value::Null);
            let weights = match &output {
                Value::String(url) => Some(url.clone()),
                Value::Object(map) => map.get("weights").and_then(Value::as_str).map(str::to_string),
                _ => None,
            };
            let Some(weights) = weights else {
                return ProviderStatus::failed("training succeeded without weights");
            };

            let mut result = TaskResult::with_artifacts(vec![Artifact::new(ArtifactKind::PersonaWeights, weights)]);
            if let Some(version) = output.get("version") {
                result.details = Some(json!({ "version": version }));
            }
            ProviderStatus::ready(result)
        }
        JobState::Failed => ProviderStatus::failed(training.error_message()),
        JobState::Processing => ProviderStatus::processing(training.progress_hint()),
    }
}

#[async_trait]
impl ProviderAdapter for PersonaAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Persona
    }

    async fn create_job(&self, spec: &JobSpec) -> std::result::Result<ProviderJobRef, ProviderError> {
        let JobRequest::PersonaTraining {
            trigger_word,
            image_urls,
            steps,
        } = &spec.request
        else {
            return Err(ProviderError::rejected("unsupported", "persona provider only trains personas"));
        };

        let mut body = json!({ "input": training_input(spec, trigger_word, image_urls, *steps) });
        if let Some(callback) = &spec.callback_url {
            body["webhook"] = json!(callback);
            body["webhook_events_filter"] = json!(["completed"]);
        }

        self.throttle.acquire(&spec.user_id).await;
        let training: Prediction = self.http.post_json("/trainings", &body).await?;

        if training.state() == JobState::Failed {
            return Err(ProviderError::rejected(training.status.clone(), training.error_message()));
        }

        Ok(ProviderJobRef::new(ProviderKind::Persona, training.id))
    }

    async fn query_status(&self, job_id: &str) -> std::result::Result<ProviderStatus, ProviderError> {
        let path = format!("/trainings/{}", urlencoding::encode(job_id));
        let training: Prediction = self.http.get_json(&path).await?;
        Ok(to_status(training))
    }

    fn parse_callback(&self, body: &[u8]) -> std::result::Result<CallbackEvent, ProviderError> {
        let training = Prediction::from_callback(body)?;
        Ok(CallbackEvent {
            job_id: training.id.clone(),
            status: to_status(training),
        })
    }

    fn housekeeping(&self) {
        self.throttle.housekeeping();
    }
}
