//! Clip extraction provider (Vizard-style open API).
//!
//! The provider answers with numeric business codes instead of HTTP status:
//! `1000` still processing, `2000` done, `4000` and above failed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::http::{AuthScheme, ProviderHttp};
use super::throttle::CreationThrottle;
use super::{CallbackEvent, JobRequest, JobSpec, ProviderAdapter, ProviderError, ProviderKind, ProviderStatus};
use crate::config::ProviderConfig;
use crate::error::Result;
use crate::models::{Artifact, ArtifactKind, AspectRatio, ProviderJobRef, TaskResult};

const CODE_PROCESSING: i64 = 1000;
const CODE_DONE: i64 = 2000;
const CODE_FAILED_FLOOR: i64 = 4000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateProject<'a> {
    video_url: &'a str,
    /// 1 = remote file URL
    video_type: u8,
    lang: &'a str,
    /// 0 = let the provider choose clip length
    prefer_length: [u8; 1],
    ratio_of_clip: u8,
    max_clip_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectResponse {
    code: i64,
    #[serde(default)]
    project_id: Option<Value>,
    #[serde(default)]
    videos: Vec<Video>,
    #[serde(default)]
    err_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
    #[serde(default)]
    video_id: Option<Value>,
    video_url: String,
    #[serde(default)]
    video_ms_duration: Option<u64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    viral_score: Option<Value>,
    #[serde(default)]
    viral_reason: Option<String>,
    #[serde(default)]
    clip_editor_url: Option<String>,
}

fn ratio_code(ratio: AspectRatio) -> u8 {
    match ratio {
        AspectRatio::Portrait => 1,
        AspectRatio::Square => 2,
        AspectRatio::Feed => 3,
        AspectRatio::Landscape => 4,
    }
}

/// Project ids come back as numbers from the API and as strings from some
/// webhook deliveries.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn classify(project: ProjectResponse) -> ProviderStatus {
    match project.code {
        CODE_DONE => {
            let artifacts = project
                .videos
                .into_iter()
                .map(|v| Artifact {
                    kind: ArtifactKind::Clip,
                    url: Some(v.video_url),
                    title: v.title,
                    metadata: json!({
                        "video_id": v.video_id,
                        "duration_ms": v.video_ms_duration,
                        "viral_score": v.viral_score,
                        "viral_reason": v.viral_reason,
                        "transcript": v.transcript,
                        "editor_url": v.clip_editor_url,
                    }),
                })
                .collect();
            ProviderStatus::ready(TaskResult::with_artifacts(artifacts))
        }
        code if code >= CODE_FAILED_FLOOR => ProviderStatus::failed(
            project
                .err_msg
                .unwrap_or_else(|| format!("clip provider error code {}", code)),
        ),
        CODE_PROCESSING => ProviderStatus::processing(None),
        // Undocumented codes below the failure range are treated as in progress.
        _ => ProviderStatus::processing(None),
    }
}

pub struct ClipsAdapter {
    http: ProviderHttp,
    throttle: CreationThrottle,
}

impl ClipsAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            http: ProviderHttp::new(config, AuthScheme::Header("VIZARDAI_API_KEY"))?,
            throttle: CreationThrottle::new(ProviderKind::Clips, config.creations_per_minute),
        })
    }
}

#[async_trait]
impl ProviderAdapter for ClipsAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Clips
    }

    async fn create_job(&self, spec: &JobSpec) -> std::result::Result<ProviderJobRef, ProviderError> {
        let JobRequest::Clips {
            aspect_ratio,
            max_clips,
            language,
        } = &spec.request
        else {
            return Err(ProviderError::rejected("unsupported", "clip provider only extracts clips"));
        };

        let body = CreateProject {
            video_url: &spec.source_media_url,
            video_type: 1,
            lang: language.as_deref().unwrap_or("auto"),
            prefer_length: [0],
            ratio_of_clip: ratio_code(*aspect_ratio),
            max_clip_number: *max_clips,
            webhook_url: spec.callback_url.as_deref(),
        };

        self.throttle.acquire(&spec.user_id).await;
        let response: ProjectResponse = self.http.post_json("/project/create", &body).await?;

        if response.code >= CODE_FAILED_FLOOR {
            return Err(ProviderError::rejected(
                response.code.to_string(),
                response.err_msg.unwrap_or_else(|| "project creation refused".to_string()),
            ));
        }

        let job_id = response
            .project_id
            .as_ref()
            .and_then(id_string)
            .ok_or_else(|| ProviderError::rejected(response.code.to_string(), "response has no projectId"))?;

        Ok(ProviderJobRef::new(ProviderKind::Clips, job_id))
    }

    async fn query_status(&self, job_id: &str) -> std::result::Result<ProviderStatus, ProviderError> {
        let path = format!("/project/query/{}", urlencoding::encode(job_id));
        let response: ProjectResponse = self.http.get_json(&path).await?;
        Ok(classify(response))
    }

    fn parse_callback(&self, body: &[u8]) -> std::result::Result<CallbackEvent, ProviderError> {
        let project: ProjectResponse =
            serde_json::from_slice(body).map_err(|e| ProviderError::InvalidCallback(e.to_string()))?;
        let job_id = project
            .project_id
            .as_ref()
            .and_then(id_string)
            .ok_or_else(|| ProviderError::InvalidCallback("missing projectId".to_string()))?;

        Ok(CallbackEvent {
            job_id,
            status: classify(project),
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
    use crate::providers::JobState;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(base_url: &str) -> ClipsAdapter {
        ClipsAdapter::new(&ProviderConfig {
            base_url: base_url.to_string(),
            api_key: Some("test-key".to_string()),
            webhook_secret: None,
            creations_per_minute: 60,
            timeout_secs: 5,
        })
        .unwrap()
    }

    fn spec() -> JobSpec {
        JobSpec {
            project_id: "P1".to_string(),
            task_type: TaskType::Clips,
            user_id: "u1".to_string(),
            source_media_url: "https://cdn.example.com/P1.mp4".to_string(),
            callback_url: Some("https://app.example.com/api/v1/webhooks/clips".to_string()),
            request: JobRequest::Clips {
                aspect_ratio: AspectRatio::Portrait,
                max_clips: 4,
                language: Some("en".to_string()),
            },
        }
    }

    #[tokio::test]
    async fn create_job_translates_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/project/create"))
            .and(header("VIZARDAI_API_KEY", "test-key"))
            .and(body_partial_json(json!({
                "videoUrl": "https://cdn.example.com/P1.mp4",
                "videoType": 1,
                "lang": "en",
                "ratioOfClip": 1,
                "maxClipNumber": 4,
                "webhookUrl": "https://app.example.com/api/v1/webhooks/clips"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 2000,
                "projectId": 17861964
            })))
            .expect(1)
            .mount(&server)
            .await;

        let job = adapter(&server.uri()).create_job(&spec()).await.unwrap();
        assert_eq!(job, ProviderJobRef::new(ProviderKind::Clips, "17861964"));
    }

    #[tokio::test]
    async fn business_error_code_is_a_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/project/create"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 4003,
                "errMsg": "video too long"
            })))
            .mount(&server)
            .await;

        let err = adapter(&server.uri()).create_job(&spec()).await.unwrap_err();
        assert_eq!(err, ProviderError::rejected("4003", "video too long"));
    }

    #[tokio::test]
    async fn provider_outage_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/project/create"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = adapter(&server.uri()).create_job(&spec()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn query_maps_codes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/project/query/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 1000, "projectId": 1 })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/project/query/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 2000,
                "projectId": 2,
                "videos": [
                    { "videoId": 11, "videoUrl": "https://cdn.example.com/c1.mp4", "title": "Hook", "videoMsDuration": 31000 },
                    { "videoId": 12, "videoUrl": "https://cdn.example.com/c2.mp4" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/project/query/3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "code": 4008, "projectId": 3 })))
            .mount(&server)
            .await;

        let adapter = adapter(&server.uri());

        let processing = adapter.query_status("1").await.unwrap();
        assert_eq!(processing.state, JobState::Processing);

        let ready = adapter.query_status("2").await.unwrap();
        assert_eq!(ready.state, JobState::Ready);
        let artifacts = ready.result.unwrap().artifacts;
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].title.as_deref(), Some("Hook"));
        assert_eq!(artifacts[0].metadata["duration_ms"], 31000);

        let failed = adapter.query_status("3").await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert!(failed.error.unwrap().contains("4008"));
    }

    #[test]
    fn unknown_low_codes_count_as_processing() {
        let status = classify(ProjectResponse {
            code: 1500,
            project_id: None,
            videos: vec![],
            err_msg: None,
        });
        assert_eq!(status.state, JobState::Processing);
    }

    #[test]
    fn callback_accepts_string_project_id() {
        let adapter = adapter("http://localhost:1");
        let event = adapter
            .parse_callback(br#"{"code":2000,"projectId":"V-123","videos":[]}"#)
            .unwrap();
        assert_eq!(event.job_id, "V-123");
        assert_eq!(event.status.state, JobState::Ready);
    }

    #[test]
    fn callback_without_project_id_is_invalid() {
        let adapter = adapter("http://localhost:1");
        assert!(matches!(
            adapter.parse_callback(br#"{"code":2000}"#),
            Err(ProviderError::InvalidCallback(_))
        ));
        assert!(matches!(
            adapter.parse_callback(b"not json"),
            Err(ProviderError::InvalidCallback(_))
        ));
    }
}
