//! Transcription provider (AssemblyAI-style v2 API).
//!
//! Webhook deliveries only carry `{transcript_id, status}`; the transcript
//! itself is fetched with a status query.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::http::{AuthScheme, ProviderHttp};
use super::throttle::CreationThrottle;
use super::{CallbackEvent, JobRequest, JobSpec, JobState, ProviderAdapter, ProviderError, ProviderKind, ProviderStatus};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::models::{Artifact, ArtifactKind, ProviderJobRef, TaskResult};

#[derive(Debug, Serialize)]
struct CreateTranscript<'a> {
    audio_url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    language_code: Option<&'a str>,
    language_detection: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct Transcript {
    id: String,
    status: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    language_code: Option<String>,
    #[serde(default)]
    audio_duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TranscriptCallback {
    transcript_id: String,
    status: String,
}

fn state_of(status: &str) -> JobState {
    match status {
        "completed" => JobState::Ready,
        "error" => JobState::Failed,
        // queued, processing
        _ => JobState::Processing,
    }
}

fn to_status(transcript: Transcript) -> ProviderStatus {
    match state_of(&transcript.status) {
        JobState::Ready => {
            let text = transcript.text.unwrap_or_default();
            let artifact = Artifact {
                kind: ArtifactKind::Transcript,
                url: None,
                title: None,
                metadata: json!({
                    "transcript_id": transcript.id,
                    "language_code": transcript.language_code,
                    "audio_duration": transcript.audio_duration,
                }),
            };
            let mut result = TaskResult::with_artifacts(vec![artifact]);
            result.details = Some(json!({
                "text": text,
                "language_code": transcript.language_code,
            }));
            ProviderStatus::ready(result)
        }
        JobState::Failed => ProviderStatus::failed(
            transcript
                .error
                .unwrap_or_else(|| "transcription failed".to_string()),
        ),
        JobState::Processing => ProviderStatus::processing(None),
    }
}

pub struct TranscriptionAdapter {
    http: ProviderHttp,
    throttle: CreationThrottle,
}

impl TranscriptionAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new(config, AuthScheme::Header("authorization"))?,
            throttle: CreationThrottle::new(ProviderKind::Transcription, config.creations_per_minute),
        })
    }
}

#[async_trait]
impl ProviderAdapter for TranscriptionAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Transcription
    }

    async fn create_job(&self, spec: &JobSpec) -> std::result::Result<ProviderJobRef, ProviderError> {
        let JobRequest::Transcription { language } = &spec.request else {
            return Err(ProviderError::rejected("unsupported", "transcription provider only transcribes"));
        };

        let body = CreateTranscript {
            audio_url: &spec.source_media_url,
            language_code: language.as_deref(),
            language_detection: language.is_none(),
            webhook_url: spec.callback_url.as_deref(),
        };

        self.throttle.acquire(&spec.user_id).await;
        let transcript: Transcript = self.http.post_json("/v2/transcript", &body).await?;

        if state_of(&transcript.status) == JobState::Failed {
            return Err(ProviderError::rejected(
                "error",
                transcript.error.unwrap_or_else(|| "transcript refused".to_string()),
            ));
        }

        Ok(ProviderJobRef::new(ProviderKind::Transcription, transcript.id))
    }

    async fn query_status(&self, job_id: &str) -> std::result::Result<ProviderStatus, ProviderError> {
        let path = format!("/v2/transcript/{}", urlencoding::encode(job_id));
        let transcript: Transcript = self.http.get_json(&path).await?;
        Ok(to_status(transcript))
    }

    fn parse_callback(&self, body: &[u8]) -> std::result::Result<CallbackEvent, ProviderError> {
        let callback: TranscriptCallback =
            serde_json::from_slice(body).map_err(|e| ProviderError::InvalidCallback(e.to_string()))?;
        if callback.transcript_id.is_empty() {
            return Err(ProviderError::InvalidCallback("missing transcript_id".to_string()));
        }

        let status = match state_of(&callback.status) {
            JobState::Processing => ProviderStatus::processing(None),
            terminal => ProviderStatus::terminal_without_details(terminal),
        };

        Ok(CallbackEvent {
            job_id: callback.transcript_id,
            status,
        })
    }

    fn housekeeping(&self) {
        self.throttle.housekeeping();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskType;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base_url: &str) -> TranscriptionAdapter {
        TranscriptionAdapter::new(&ProviderConfig {
            base_url: base_url.to_string(),
            api_key: Some("aai-key".to_string()),
            webhook_secret: None,
            creations_per_minute: 30,
            timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn detects_language_when_none_given() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/transcript"))
            .and(header("authorization", "aai-key"))
            .and(body_json(json!({
                "audio_url": "https://cdn.example.com/P1.mp4",
                "language_detection": true,
                "webhook_url": "https://app.example.com/api/v1/webhooks/transcription"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "tx-1", "status": "queued" })))
            .expect(1)
            .mount(&server)
            .await;

        let spec = JobSpec {
            project_id: "P1".to_string(),
            task_type: TaskType::Transcription,
            user_id: "u1".to_string(),
            source_media_url: "https://cdn.example.com/P1.mp4".to_string(),
            callback_url: Some("https://app.example.com/api/v1/webhooks/transcription".to_string()),
            request: JobRequest::Transcription { language: None },
        };

        let job = adapter(&server.uri()).create_job(&spec).await.unwrap();
        assert_eq!(job.job_id, "tx-1");
    }

    #[tokio::test]
    async fn completed_transcript_carries_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v2/transcript/tx-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tx-1",
                "status": "completed",
                "text": "Hello and welcome.",
                "language_code": "en_us",
                "audio_duration": 62.5
            })))
            .mount(&server)
            .await;

        let status = adapter(&server.uri()).query_status("tx-1").await.unwrap();
        assert_eq!(status.state, JobState::Ready);
        let result = status.result.unwrap();
        assert_eq!(result.details.unwrap()["text"], "Hello and welcome.");
        assert_eq!(result.artifacts[0].kind, ArtifactKind::Transcript);
        assert!(result.artifacts[0].url.is_none());
    }

    #[test]
    fn callback_needs_follow_up_query() {
        let event = adapter("http://localhost:1")
            .parse_callback(br#"{"transcript_id":"tx-1","status":"completed"}"#)
            .unwrap();
        assert_eq!(event.job_id, "tx-1");
        assert!(event.status.needs_fetch());
    }
}
