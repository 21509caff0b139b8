//! Shared HTTP plumbing for provider adapters.

use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};

use super::ProviderError;
use crate::config::ProviderConfig;
use crate::error::{AppError, Result};

/// Longest provider error body kept in a task's last error.
const MAX_ERROR_BODY: usize = 512;

/// How the API key is presented to the provider.
#[derive(Debug, Clone)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Key sent verbatim in the named header
    Header(&'static str),
}

/// JSON client bound to one provider base URL.
#[derive(Debug, Clone)]
pub struct ProviderHttp {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    auth: AuthScheme,
}

impl ProviderHttp {
    pub fn new(config: &ProviderConfig, auth: AuthScheme) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            auth,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth {
            AuthScheme::Bearer => request.bearer_auth(&self.api_key),
            AuthScheme::Header(name) => request.header(name, &self.api_key),
        }
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> std::result::Result<T, ProviderError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.authorize(self.client.post(self.url(path))).json(body);
        let response = request.send().await?;
        parse_response(response).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> std::result::Result<T, ProviderError> {
        let request = self.authorize(self.client.get(self.url(path)));
        let response = request.send().await?;
        parse_response(response).await
    }
}

/// Rate limiting and server errors are worth retrying; any other
/// unsuccessful status means the provider refused the request.
pub fn classify_status(status: StatusCode, message: String) -> ProviderError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(format!("HTTP {}: {}", status.as_u16(), message))
    } else {
        ProviderError::rejected(status.as_u16().to_string(), message)
    }
}

async fn parse_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> std::result::Result<T, ProviderError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        return Err(classify_status(status, truncate(body)));
    }

    Ok(response.json::<T>().await?)
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttling_and_outages_are_transient() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_transient());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_transient());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, String::new()).is_transient());
    }

    #[test]
    fn client_errors_are_rejections() {
        let err = classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad url".to_string());
        assert_eq!(err, ProviderError::rejected("422", "bad url"));
        assert!(!classify_status(StatusCode::UNAUTHORIZED, String::new()).is_transient());
    }

    #[test]
    fn long_bodies_are_truncated_on_char_boundary() {
        let body = "é".repeat(MAX_ERROR_BODY);
        let cut = truncate(body);
        assert!(cut.len() <= MAX_ERROR_BODY);
        assert!(cut.chars().all(|c| c == 'é'));
    }
}
