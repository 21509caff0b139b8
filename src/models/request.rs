use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{AppError, Result};
use crate::models::TaskType;

pub const MAX_CLIPS: u32 = 20;
pub const MAX_PERSONA_IMAGES: usize = 50;
pub const MAX_THUMBNAIL_PROMPTS: usize = 8;
const MIN_TRAINING_STEPS: u32 = 100;
const MAX_TRAINING_STEPS: u32 = 4000;

/// Output frame shape, shared by clips and thumbnails
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub enum AspectRatio {
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:5")]
    Feed,
    #[serde(rename = "16:9")]
    Landscape,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Portrait => "9:16",
            AspectRatio::Square => "1:1",
            AspectRatio::Feed => "4:5",
            AspectRatio::Landscape => "16:9",
        }
    }
}

impl std::fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn portrait() -> AspectRatio {
    AspectRatio::Portrait
}

fn landscape() -> AspectRatio {
    AspectRatio::Landscape
}

fn default_max_clips() -> u32 {
    10
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct TranscriptionRequest {
    /// Language code (e.g. `en`, `pt-BR`). Absent: automatic detection.
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ClipsRequest {
    #[serde(default = "portrait")]
    pub aspect_ratio: AspectRatio,
    /// 1-20, default 10
    #[serde(default = "default_max_clips")]
    pub max_clips: u32,
    #[serde(default)]
    pub language: Option<String>,
}

impl Default for ClipsRequest {
    fn default() -> Self {
        Self {
            aspect_ratio: portrait(),
            max_clips: default_max_clips(),
            language: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PersonaTrainingRequest {
    /// Token that activates the trained persona in later prompts
    pub trigger_word: String,
    /// Training images. Empty: train from the project's source video.
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub steps: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ThumbnailBatchRequest {
    /// One thumbnail variant is generated per prompt
    pub prompts: Vec<String>,
    #[serde(default = "landscape")]
    pub aspect_ratio: AspectRatio,
}

/// Validated start payload of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskPayload {
    Transcription(TranscriptionRequest),
    Clips(ClipsRequest),
    PersonaTraining(PersonaTrainingRequest),
    ThumbnailBatch(ThumbnailBatchRequest),
}

impl TaskPayload {
    /// Decodes and validates `value` for `task_type`. A null body counts as
    /// an empty object.
    pub fn parse(task_type: TaskType, value: serde_json::Value) -> Result<Self> {
        let value = match value {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            v => v,
        };

        let payload = match task_type {
            TaskType::Transcription => TaskPayload::Transcription(decode(value)?),
            TaskType::Clips => TaskPayload::Clips(decode(value)?),
            TaskType::PersonaTraining => TaskPayload::PersonaTraining(decode(value)?),
            TaskType::ThumbnailBatch => TaskPayload::ThumbnailBatch(decode(value)?),
        };

        payload.validate()?;
        Ok(payload)
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::Transcription(_) => TaskType::Transcription,
            TaskPayload::Clips(_) => TaskType::Clips,
            TaskPayload::PersonaTraining(_) => TaskType::PersonaTraining,
            TaskPayload::ThumbnailBatch(_) => TaskType::ThumbnailBatch,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        let value = match self {
            TaskPayload::Transcription(r) => serde_json::to_value(r),
            TaskPayload::Clips(r) => serde_json::to_value(r),
            TaskPayload::PersonaTraining(r) => serde_json::to_value(r),
            TaskPayload::ThumbnailBatch(r) => serde_json::to_value(r),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    fn validate(&self) -> Result<()> {
        match self {
            TaskPayload::Transcription(r) => validate_language(r.language.as_deref()),
            TaskPayload::Clips(r) => {
                if r.max_clips == 0 || r.max_clips > MAX_CLIPS {
                    return Err(AppError::Validation(format!(
                        "max_clips must be between 1 and {}",
                        MAX_CLIPS
                    )));
                }
                validate_language(r.language.as_deref())
            }
            TaskPayload::PersonaTraining(r) => {
                if r.trigger_word.is_empty() || r.trigger_word.chars().any(char::is_whitespace) {
                    return Err(AppError::Validation(
                        "trigger_word must be a single non-empty word".to_string(),
                    ));
                }
                if r.image_urls.len() > MAX_PERSONA_IMAGES {
                    return Err(AppError::Validation(format!(
                        "at most {} training images are allowed",
                        MAX_PERSONA_IMAGES
                    )));
                }
                for url in &r.image_urls {
                    validate_url(url)?;
                }
                if let Some(steps) = r.steps {
                    if !(MIN_TRAINING_STEPS..=MAX_TRAINING_STEPS).contains(&steps) {
                        return Err(AppError::Validation(format!(
                            "steps must be between {} and {}",
                            MIN_TRAINING_STEPS, MAX_TRAINING_STEPS
                        )));
                    }
                }
                Ok(())
            }
            TaskPayload::ThumbnailBatch(r) => {
                if r.prompts.is_empty() || r.prompts.len() > MAX_THUMBNAIL_PROMPTS {
                    return Err(AppError::Validation(format!(
                        "prompts must contain between 1 and {} entries",
                        MAX_THUMBNAIL_PROMPTS
                    )));
                }
                if r.prompts.iter().any(|p| p.trim().is_empty()) {
                    return Err(AppError::Validation("prompts must not be blank".to_string()));
                }
                Ok(())
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| AppError::Validation(e.to_string()))
}

fn validate_language(language: Option<&str>) -> Result<()> {
    let Some(lang) = language else {
        return Ok(());
    };

    let well_formed = (2..=8).contains(&lang.len())
        && lang.chars().all(|c| c.is_ascii_alphabetic() || c == '-')
        && !lang.starts_with('-');

    if well_formed {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid language code '{}'", lang)))
    }
}

/// Only absolute http(s) URLs can be fetched by a provider.
pub fn validate_url(url: &str) -> Result<()> {
    match reqwest::Url::parse(url) {
        Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
        _ => Err(AppError::Validation(format!("invalid url '{}'", url))),
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateProjectRequest {
    /// Project id chosen by the upload service. Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Stable, provider-reachable URL of the uploaded video
    pub source_media_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn clips_defaults_apply_to_empty_body() {
        let payload = TaskPayload::parse(TaskType::Clips, serde_json::Value::Null).unwrap();
        assert_eq!(payload, TaskPayload::Clips(ClipsRequest::default()));
    }

    #[test]
    fn clips_rejects_out_of_range_count() {
        let err = TaskPayload::parse(TaskType::Clips, json!({ "max_clips": 21 })).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(TaskPayload::parse(TaskType::Clips, json!({ "max_clips": 0 })).is_err());
        assert!(TaskPayload::parse(TaskType::Clips, json!({ "max_clips": 20 })).is_ok());
    }

    #[test]
    fn clips_rejects_unknown_aspect_ratio() {
        assert!(TaskPayload::parse(TaskType::Clips, json!({ "aspect_ratio": "3:2" })).is_err());
        let ok = TaskPayload::parse(TaskType::Clips, json!({ "aspect_ratio": "1:1" })).unwrap();
        match ok {
            TaskPayload::Clips(r) => assert_eq!(r.aspect_ratio, AspectRatio::Square),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(TaskPayload::parse(TaskType::Transcription, json!({ "lang": "en" })).is_err());
    }

    #[test]
    fn language_codes_are_checked() {
        assert!(TaskPayload::parse(TaskType::Transcription, json!({ "language": "pt-BR" })).is_ok());
        assert!(TaskPayload::parse(TaskType::Transcription, json!({ "language": "e" })).is_err());
        assert!(TaskPayload::parse(TaskType::Transcription, json!({ "language": "en_US" })).is_err());
    }

    #[test]
    fn persona_trigger_word_must_be_one_word() {
        assert!(TaskPayload::parse(
            TaskType::PersonaTraining,
            json!({ "trigger_word": "my persona" })
        )
        .is_err());
        assert!(TaskPayload::parse(TaskType::PersonaTraining, json!({})).is_err());
        assert!(TaskPayload::parse(
            TaskType::PersonaTraining,
            json!({ "trigger_word": "TOK", "steps": 1000 })
        )
        .is_ok());
    }

    #[test]
    fn persona_image_urls_must_be_http() {
        let err = TaskPayload::parse(
            TaskType::PersonaTraining,
            json!({ "trigger_word": "TOK", "image_urls": ["file:///etc/passwd"] }),
        );
        assert!(err.is_err());
    }

    #[test]
    fn thumbnail_batch_bounds() {
        assert!(TaskPayload::parse(TaskType::ThumbnailBatch, json!({ "prompts": [] })).is_err());
        let nine: Vec<String> = (0..9).map(|i| format!("variant {i}")).collect();
        assert!(TaskPayload::parse(TaskType::ThumbnailBatch, json!({ "prompts": nine })).is_err());
        let payload =
            TaskPayload::parse(TaskType::ThumbnailBatch, json!({ "prompts": ["a", "b"] })).unwrap();
        match payload {
            TaskPayload::ThumbnailBatch(r) => assert_eq!(r.aspect_ratio, AspectRatio::Landscape),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn stored_payload_parses_back() {
        let payload =
            TaskPayload::parse(TaskType::Clips, json!({ "max_clips": 4, "language": "en" })).unwrap();
        let again = TaskPayload::parse(TaskType::Clips, payload.to_value()).unwrap();
        assert_eq!(payload, again);
    }
}
