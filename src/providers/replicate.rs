//! Shared vocabulary of Replicate-style prediction/training APIs.

use serde::Deserialize;
use serde_json::Value;

use super::{JobState, ProviderError};

/// Prediction or training object as returned by create, get and webhook.
#[derive(Debug, Deserialize)]
pub(crate) struct Prediction {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub logs: Option<String>,
}

impl Prediction {
    pub fn from_callback(body: &[u8]) -> Result<Self, ProviderError> {
        let prediction: Prediction =
            serde_json::from_slice(body).map_err(|e| ProviderError::InvalidCallback(e.to_string()))?;
        if prediction.id.is_empty() {
            return Err(ProviderError::InvalidCallback("missing id".to_string()));
        }
        Ok(prediction)
    }

    pub fn state(&self) -> JobState {
        match self.status.as_str() {
            "succeeded" => JobState::Ready,
            "failed" | "canceled" => JobState::Failed,
            // starting, processing
            _ => JobState::Processing,
        }
    }

    pub fn error_message(&self) -> String {
        match &self.error {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Null) | None => format!("job {}", self.status),
            Some(other) => other.to_string(),
        }
    }

    /// Last `NN%` found in the logs, as written by progress bars.
    pub fn progress_hint(&self) -> Option<u8> {
        let logs = self.logs.as_deref()?;
        let line = logs.lines().rev().find(|l| l.contains('%'))?;
        let head = &line[..line.rfind('%')?];
        let digits: String = head
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        digits.parse::<u8>().ok().filter(|p| *p <= 100)
    }

    /// Output URLs: a single string or a list of strings.
    pub fn output_urls(&self) -> Vec<String> {
        match &self.output {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn prediction(value: Value) -> Prediction {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn status_vocabulary() {
        for (status, state) in [
            ("starting", JobState::Processing),
            ("processing", JobState::Processing),
            ("succeeded", JobState::Ready),
            ("failed", JobState::Failed),
            ("canceled", JobState::Failed),
        ] {
            assert_eq!(prediction(json!({ "id": "x", "status": status })).state(), state);
        }
    }

    #[test]
    fn progress_hint_reads_last_percentage() {
        let p = prediction(json!({
            "id": "x",
            "status": "processing",
            "logs": "flux_train_replicate:  10%|#  | 100/1000\nflux_train_replicate:  42%|####  | 420/1000\nsaving"
        }));
        assert_eq!(p.progress_hint(), Some(42));
        assert_eq!(prediction(json!({ "id": "x", "status": "starting" })).progress_hint(), None);
    }

    #[test]
    fn output_urls_accept_string_or_list() {
        let single = prediction(json!({ "id": "x", "status": "succeeded", "output": "https://r.example/a.png" }));
        assert_eq!(single.output_urls(), vec!["https://r.example/a.png"]);
        let many = prediction(json!({ "id": "x", "status": "succeeded", "output": ["https://r.example/a.png", "https://r.example/b.png"] }));
        assert_eq!(many.output_urls().len(), 2);
    }
}
