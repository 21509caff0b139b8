//! Image generation provider for thumbnail variants, Replicate predictions API.
//! One prediction per thumbnail prompt.

use async_trait::async_trait;
use serde_json::json;

use super::http::{AuthScheme, ProviderHttp};
use super::replicate::Prediction;
use super::throttle::CreationThrottle;
use super::{CallbackEvent, JobRequest, JobSpec, JobState, ProviderAdapter, ProviderError, ProviderKind, ProviderStatus};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::models::{Artifact, ArtifactKind, ProviderJobRef, TaskResult};

pub struct ImagesAdapter {
    http: ProviderHttp,
    throttle: CreationThrottle,
}

impl ImagesAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new(config, AuthScheme::Bearer)?,
            throttle: CreationThrottle::new(ProviderKind::Images, config.creations_per_minute),
        })
    }
}

fn to_status(prediction: Prediction) -> ProviderStatus {
    match prediction.state() {
        JobState::Ready => {
            let urls = prediction.output_urls();
            if urls.is_empty() {
                return ProviderStatus::failed("prediction succeeded without output");
            }
            let artifacts = urls
                .into_iter()
                .map(|url| Artifact::new(ArtifactKind::Thumbnail, url))
                .collect();
            ProviderStatus::ready(TaskResult::with_artifacts(artifacts))
        }
        JobState::Failed => ProviderStatus::failed(prediction.error_message()),
        JobState::Processing => ProviderStatus::processing(prediction.progress_hint()),
    }
}

#[async_trait]
impl ProviderAdapter for ImagesAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Images
    }

    async fn create_job(&self, spec: &JobSpec) -> std::result::Result<ProviderJobRef, ProviderError> {
        let JobRequest::Thumbnail { prompt, aspect_ratio } = &spec.request else {
            return Err(ProviderError::rejected("unsupported", "image provider only renders thumbnails"));
        };

        let mut body = json!({
            "input": {
                "prompt": prompt,
                "aspect_ratio": aspect_ratio.as_str(),
                "output_format": "png",
            }
        });
        if let Some(callback) = &spec.callback_url {
            body["webhook"] = json!(callback);
            body["webhook_events_filter"] = json!(["completed"]);
        }

        self.throttle.acquire(&spec.user_id).await;
        let prediction: Prediction = self.http.post_json("/predictions", &body).await?;

        if prediction.state() == JobState::Failed {
            return Err(ProviderError::rejected(prediction.status.clone(), prediction.error_message()));
        }

        Ok(ProviderJobRef::new(ProviderKind::Images, prediction.id))
    }

    async fn query_status(&self, job_id: &str) -> std::result::Result<ProviderStatus, ProviderError> {
        let path = format!("/predictions/{}", urlencoding::encode(job_id));
        let prediction: Prediction = self.http.get_json(&path).await?;
        Ok(to_status(prediction))
    }

    fn parse_callback(&self, body: &[u8]) -> std::result::Result<CallbackEvent, ProviderError> {
        let prediction = Prediction::from_callback(body)?;
        Ok(CallbackEvent {
            job_id: prediction.id.clone(),
            status: to_status(prediction),
        })
    }

    fn housekeeping(&self) {
        self.throttle.housekeeping();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AspectRatio, TaskType};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base_url: &str) -> ImagesAdapter {
        ImagesAdapter::new(&ProviderConfig {
            base_url: base_url.to_string(),
            api_key: Some("r8_test".to_string()),
            webhook_secret: None,
            creations_per_minute: 60,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn creates_one_prediction_per_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .and(body_partial_json(json!({ "input": { "prompt": "bold title, red", "aspect_ratio": "16:9" } })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "pr-1", "status": "starting" })))
            .expect(1)
            .mount(&server)
            .await;

        let spec = JobSpec {
            project_id: "P1".to_string(),
            task_type: TaskType::ThumbnailBatch,
            user_id: "u1".to_string(),
            source_media_url: "https://cdn.example.com/P1.mp4".to_string(),
            callback_url: None,
            request: JobRequest::Thumbnail {
                prompt: "bold title, red".to_string(),
                aspect_ratio: AspectRatio::Landscape,
            },
        };

        let job = adapter(&server.uri()).create_job(&spec).await.unwrap();
        assert_eq!(job, ProviderJobRef::new(ProviderKind::Images, "pr-1"));
    }

    #[tokio::test]
    async fn invalid_input_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/predictions"))
            .respond_with(ResponseTemplate::new(422).set_body_string("{\"detail\":\"prompt is required\"}"))
            .mount(&server)
            .await;

        let spec = JobSpec {
            project_id: "P1".to_string(),
            task_type: TaskType::ThumbnailBatch,
            user_id: "u1".to_string(),
            source_media_url: "https://cdn.example.com/P1.mp4".to_string(),
            callback_url: None,
            request: JobRequest::Thumbnail {
                prompt: "x".to_string(),
                aspect_ratio: AspectRatio::Square,
            },
        };

        let err = adapter(&server.uri()).create_job(&spec).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { ref code, .. } if code == "422"));
    }

    #[test]
    fn succeeded_callback_lists_thumbnails() {
        let event = adapter("http://localhost:1")
            .parse_callback(br#"{"id":"pr-1","status":"succeeded","output":["https://r.example/t.png"]}"#)
            .unwrap();
        let result = event.status.result.unwrap();
        assert_eq!(result.artifacts, vec![Artifact::new(ArtifactKind::Thumbnail, "https://r.example/t.png")]);
    }
}
