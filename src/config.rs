use std::time::Duration;

use crate::providers::ProviderKind;

/// Connection settings for one external provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Providers without an API key are not registered at startup.
    pub api_key: Option<String>,
    /// Shared secret used to verify `X-Webhook-Signature` on callbacks.
    pub webhook_secret: Option<String>,
    /// Documented create-job ceiling, per user.
    pub creations_per_minute: u32,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    fn with_defaults(base_url: &str, creations_per_minute: u32) -> Self {
        Self {
            base_url: base_url.to_string(),
            api_key: None,
            webhook_secret: None,
            creations_per_minute,
            timeout_secs: 30,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn apply_env(&mut self, prefix: &str) {
        if let Ok(url) = std::env::var(format!("{prefix}_BASE_URL")) {
            self.base_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(key) = std::env::var(format!("{prefix}_API_KEY")) {
            self.api_key = Some(key);
        }

        if let Ok(secret) = std::env::var(format!("{prefix}_WEBHOOK_SECRET")) {
            self.webhook_secret = Some(secret);
        }

        if let Some(rpm) = env_parse(&format!("{prefix}_CREATIONS_PER_MINUTE")) {
            self.creations_per_minute = rpm;
        }

        if let Some(t) = env_parse(&format!("{prefix}_TIMEOUT_SECS")) {
            self.timeout_secs = t;
        }
    }
}

/// Tunables of the orchestration core. Every value here is a product
/// default, not a protocol requirement.
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    /// Percent written when a task is accepted.
    pub accepted_percent: u8,
    /// Percent written once the provider returned a job id.
    pub submitted_percent: u8,
    /// Minimum gap between two provider queries for the same task.
    pub poll_interval_secs: u64,
    /// Poll attempts after which a task is reported as stalled.
    pub max_poll_attempts: u32,
    /// How long the sweeper waits for a webhook before polling.
    pub webhook_grace_secs: u64,
    pub sweep_interval_secs: u64,
    /// Upper bound of the sweeper's exponential backoff.
    pub max_poll_backoff_secs: u64,
    /// Age after which a submission that never recorded a provider job is
    /// considered lost (worker restart mid-submission).
    pub stale_submission_secs: u64,
    /// Retries of a transient provider failure (not counting the first try).
    pub create_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            accepted_percent: 5,
            submitted_percent: 15,
            poll_interval_secs: 10,
            max_poll_attempts: 360,
            webhook_grace_secs: 60,
            sweep_interval_secs: 30,
            max_poll_backoff_secs: 600,
            stale_submission_secs: 300,
            create_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 8_000,
        }
    }
}

impl OrchestrationConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn webhook_grace(&self) -> Duration {
        Duration::from_secs(self.webhook_grace_secs)
    }

    pub fn stale_submission(&self) -> Duration {
        Duration::from_secs(self.stale_submission_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Backoff before the sweeper queries a task again:
    /// `poll_interval * 2^attempts`, capped at `max_poll_backoff_secs`.
    pub fn poll_backoff(&self, attempts: u32) -> Duration {
        let base = self.poll_interval_secs.max(1);
        let factor = 2u64.saturating_pow(attempts.min(32));
        Duration::from_secs(base.saturating_mul(factor).min(self.max_poll_backoff_secs))
    }

    fn apply_env(&mut self) {
        if let Some(v) = env_parse::<u8>("REPURPOSE_ACCEPTED_PERCENT") {
            self.accepted_percent = v.min(100);
        }
        if let Some(v) = env_parse::<u8>("REPURPOSE_SUBMITTED_PERCENT") {
            self.submitted_percent = v.min(100);
        }
        if let Some(v) = env_parse("REPURPOSE_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = v;
        }
        if let Some(v) = env_parse("REPURPOSE_MAX_POLL_ATTEMPTS") {
            self.max_poll_attempts = v;
        }
        if let Some(v) = env_parse("REPURPOSE_WEBHOOK_GRACE_SECS") {
            self.webhook_grace_secs = v;
        }
        if let Some(v) = env_parse("REPURPOSE_SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = v;
        }
        if let Some(v) = env_parse("REPURPOSE_MAX_POLL_BACKOFF_SECS") {
            self.max_poll_backoff_secs = v;
        }
        if let Some(v) = env_parse("REPURPOSE_STALE_SUBMISSION_SECS") {
            self.stale_submission_secs = v;
        }
        if let Some(v) = env_parse("REPURPOSE_CREATE_RETRIES") {
            self.create_retries = v;
        }
        if let Some(v) = env_parse("REPURPOSE_RETRY_BASE_DELAY_MS") {
            self.retry_base_delay_ms = v;
        }
        if let Some(v) = env_parse("REPURPOSE_RETRY_MAX_DELAY_MS") {
            self.retry_max_delay_ms = v;
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Externally reachable base URL, used to build provider callback URLs.
    pub public_base_url: String,
    /// Inbound request ceiling for the whole API.
    pub requests_per_minute: u32,
    pub max_webhook_body_kb: usize,
    pub orchestration: OrchestrationConfig,
    pub clips: ProviderConfig,
    pub persona: ProviderConfig,
    pub images: ProviderConfig,
    pub transcription: ProviderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            database_url: "sqlite:repurpose.db?mode=rwc".to_string(),
            public_base_url: "http://localhost:4000".to_string(),
            requests_per_minute: 600,
            max_webhook_body_kb: 1024,
            orchestration: OrchestrationConfig::default(),
            clips: ProviderConfig::with_defaults("https://elb-api.vizard.ai/hvizard-server-front/open-api/v1", 3),
            persona: ProviderConfig::with_defaults("https://api.replicate.com/v1", 10),
            images: ProviderConfig::with_defaults("https://api.replicate.com/v1", 60),
            transcription: ProviderConfig::with_defaults("https://api.assemblyai.com", 30),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("REPURPOSE_HOST") {
            config.host = host;
        }

        if let Some(port) = env_parse("REPURPOSE_PORT") {
            config.port = port;
        }

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = url;
        }

        if let Ok(url) = std::env::var("REPURPOSE_PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(rpm) = env_parse("REPURPOSE_REQUESTS_PER_MINUTE") {
            config.requests_per_minute = rpm;
        }

        if let Some(kb) = env_parse("REPURPOSE_MAX_WEBHOOK_BODY_KB") {
            config.max_webhook_body_kb = kb;
        }

        config.orchestration.apply_env();
        config.clips.apply_env("CLIPS_PROVIDER");
        config.persona.apply_env("PERSONA_PROVIDER");
        config.images.apply_env("IMAGE_PROVIDER");
        config.transcription.apply_env("TRANSCRIPTION_PROVIDER");

        config
    }

    pub fn provider(&self, kind: ProviderKind) -> &ProviderConfig {
        match kind {
            ProviderKind::Clips => &self.clips,
            ProviderKind::Persona => &self.persona,
            ProviderKind::Images => &self.images,
            ProviderKind::Transcription => &self.transcription,
        }
    }

    /// Callback URL handed to a provider at job creation.
    pub fn callback_url(&self, kind: ProviderKind) -> String {
        format!("{}/api/v1/webhooks/{}", self.public_base_url, kind)
    }

    pub fn max_webhook_body_bytes(&self) -> usize {
        self.max_webhook_body_kb * 1024
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
